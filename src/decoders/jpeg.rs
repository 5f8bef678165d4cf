use crate::log_debug;
use crate::utils::bitreader::BitReader;
use crate::utils::error::{JexelError, JexelResult};
use crate::utils::image::{Image, PixelData, Plane};
use crate::utils::info::JpegInfo;
use serde::Serialize;
use std::io::{Read, Seek};
use tsify::Tsify;

#[derive(Debug, Clone, PartialEq)]
enum JpegMarker {
    SOI,
    EOI,
    SOS,
    DQT,
    DHT,
    DRI,
    COM,
    SOF0,
    SOF2,
    /// Any other start-of-frame marker; none of them are supported.
    SOF(u8),
    RST(u8),
    APP(u8),
}

impl JpegMarker {
    fn from_u16(value: u16) -> Option<JpegMarker> {
        match value {
            0xFFD8 => Some(JpegMarker::SOI),
            0xFFD9 => Some(JpegMarker::EOI),
            0xFFDA => Some(JpegMarker::SOS),
            0xFFDB => Some(JpegMarker::DQT),
            0xFFC4 => Some(JpegMarker::DHT),
            0xFFDD => Some(JpegMarker::DRI),
            0xFFFE => Some(JpegMarker::COM),
            0xFFC0 => Some(JpegMarker::SOF0),
            0xFFC2 => Some(JpegMarker::SOF2),
            0xFFC1 | 0xFFC3 | 0xFFC5..=0xFFC7 | 0xFFC9..=0xFFCB | 0xFFCD..=0xFFCF => {
                Some(JpegMarker::SOF((value & 0xFF) as u8))
            }
            0xFFD0..=0xFFD7 => Some(JpegMarker::RST((value - 0xFFD0) as u8)),
            0xFFE0..=0xFFEF => Some(JpegMarker::APP((value - 0xFFE0) as u8)),
            _ => None,
        }
    }
}

// Maps zigzag positions to row-major 8x8 indices
#[rustfmt::skip]
const ZIGZAG: [u8; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

const FAST_BITS: usize = 9;
const FAST_SIZE: usize = 1 << FAST_BITS;

#[derive(Debug, Clone, PartialEq, Serialize, Tsify)]
pub enum JpegMode {
    Baseline,
    Progressive,
}

#[derive(Debug, Clone, Serialize, Tsify)]
pub struct QuantizationTable {
    pub id: u8,
    /// 64 values in natural (row-major) order.
    pub table: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Tsify)]
pub struct ColorComponentInfo {
    pub id: u8,
    pub horizontal_sampling_factor: u8,
    pub vertical_sampling_factor: u8,
    pub quantization_table_id: u8,
    pub dc_table_selector: u8,
    pub ac_table_selector: u8,
}

#[derive(Debug, Clone, Serialize, Tsify)]
pub struct ScanInfo {
    pub start_spectral: u8,
    pub end_spectral: u8,
    pub successive_high: u8,
    pub successive_low: u8,
    pub component_ids: Vec<u8>,
}

/// A canonical Huffman table with a 9-bit fast lookup.
///
/// Codes of up to 9 bits decode in a single table probe; longer codes fall
/// back to a scan over the per-length maximum codes, preshifted to 16 bits
/// so the comparison never needs a variable shift.
#[derive(Clone)]
struct HuffmanTable {
    fast: [u8; FAST_SIZE],
    codes: [u16; 256],
    values: [u8; 256],
    sizes: [u8; 257],
    max_code: [u32; 18],
    delta: [i32; 17],
}

impl HuffmanTable {
    fn build(counts: &[u8; 16], symbols: &[u8]) -> JexelResult<HuffmanTable> {
        let mut sizes = [0u8; 257];
        let mut total = 0usize;

        for (i, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                if total >= 256 {
                    return Err(JexelError::CorruptJpeg("too many huffman symbols".to_string()));
                }
                sizes[total] = (i + 1) as u8;
                total += 1;
            }
        }

        if symbols.len() < total {
            return Err(JexelError::CorruptJpeg(
                "huffman symbol list shorter than its code counts".to_string(),
            ));
        }

        let mut codes = [0u16; 256];
        let mut max_code = [0u32; 18];
        let mut delta = [0i32; 17];

        let mut code = 0u32;
        let mut k = 0usize;
        for j in 1..=16usize {
            delta[j] = k as i32 - code as i32;

            if sizes[k] as usize == j {
                while sizes[k] as usize == j {
                    codes[k] = code as u16;
                    code += 1;
                    k += 1;
                }

                // No more than 2^j codes of length j can exist
                if code - 1 >= 1 << j {
                    return Err(JexelError::CorruptJpeg("bad huffman code lengths".to_string()));
                }
            }

            max_code[j] = code << (16 - j);
            code <<= 1;
        }
        max_code[17] = u32::MAX;

        let mut values = [0u8; 256];
        values[..total].copy_from_slice(&symbols[..total]);

        // 255 marks entries with no code of 9 bits or fewer
        let mut fast = [0xFFu8; FAST_SIZE];
        for i in 0..total {
            let size = sizes[i] as usize;
            if size <= FAST_BITS {
                let base = (codes[i] as usize) << (FAST_BITS - size);
                let span = 1usize << (FAST_BITS - size);
                for entry in fast.iter_mut().skip(base).take(span) {
                    *entry = i as u8;
                }
            }
        }

        Ok(HuffmanTable {
            fast,
            codes,
            values,
            sizes,
            max_code,
            delta,
        })
    }
}

#[derive(Debug, Clone)]
struct Component {
    id: u8,
    h_samp: u8,
    v_samp: u8,
    quant_id: u8,
    dc_id: u8,
    ac_id: u8,
    dc_pred: i32,
    width: u32,
    height: u32,
    blocks_wide: u32,
    blocks_high: u32,
    coeffs: Vec<i16>,
    plane: Plane,
}

/// Decoder for baseline and progressive DCT JPEG streams.
///
/// Coefficients are accumulated per component across all scans, then
/// dequantized, transformed and color-converted once the EOI marker is
/// reached. The decoder owns all of its state; a single `decode` call is
/// the unit of work.
pub struct JpegDecoder<R: Read + Seek> {
    reader: BitReader<R>,
    width: u32,
    height: u32,
    precision: u8,
    progressive: bool,
    max_h: u8,
    max_v: u8,
    mcus_wide: u32,
    mcus_high: u32,
    restart_interval: u32,
    components: Vec<Component>,
    quant_tables: [Option<QuantizationTable>; 4],
    dc_tables: [Option<HuffmanTable>; 4],
    ac_tables: [Option<HuffmanTable>; 4],
    scan_components: Vec<usize>,
    spectral_start: u8,
    spectral_end: u8,
    approx_high: u8,
    approx_low: u8,
    eob_run: u32,
    scans: Vec<ScanInfo>,
}

impl<R: Read + Seek> JpegDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BitReader::new(reader),
            width: 0,
            height: 0,
            precision: 0,
            progressive: false,
            max_h: 1,
            max_v: 1,
            mcus_wide: 0,
            mcus_high: 0,
            restart_interval: 0,
            components: Vec::new(),
            quant_tables: [None, None, None, None],
            dc_tables: [None, None, None, None],
            ac_tables: [None, None, None, None],
            scan_components: Vec::new(),
            spectral_start: 0,
            spectral_end: 0,
            approx_high: 0,
            approx_low: 0,
            eob_run: 0,
            scans: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get_info(&self) -> JpegInfo {
        JpegInfo {
            width: self.width,
            height: self.height,
            color_depth: self.precision,
            number_of_components: self.components.len() as u8,
            mode: if self.progressive {
                JpegMode::Progressive
            } else {
                JpegMode::Baseline
            },
            color_components: self
                .components
                .iter()
                .map(|c| ColorComponentInfo {
                    id: c.id,
                    horizontal_sampling_factor: c.h_samp,
                    vertical_sampling_factor: c.v_samp,
                    quantization_table_id: c.quant_id,
                    dc_table_selector: c.dc_id,
                    ac_table_selector: c.ac_id,
                })
                .collect(),
            quantization_tables: self.quant_tables.iter().flatten().cloned().collect(),
            restart_interval: self.restart_interval,
            scans: self.scans.clone(),
        }
    }

    /// Decodes the stream into an RGBA image of exactly the SOF-declared
    /// dimensions. Any malformed or unsupported construct aborts the whole
    /// decode; no partial image is returned.
    pub fn decode(&mut self) -> JexelResult<Image> {
        let soi = self.reader.read_u16()?;
        if soi != 0xFFD8 {
            return Err(JexelError::CorruptJpeg("missing SOI marker".to_string()));
        }

        loop {
            let marker = self.next_marker()?;
            log_debug!("Found marker: {:?}", marker);

            match marker {
                JpegMarker::EOI => break,
                JpegMarker::DQT => self.read_quantization_tables()?,
                JpegMarker::DHT => self.read_huffman_tables()?,
                JpegMarker::DRI => self.read_restart_interval()?,
                JpegMarker::SOF0 => self.read_start_of_frame(false)?,
                JpegMarker::SOF2 => self.read_start_of_frame(true)?,
                JpegMarker::SOF(code) => {
                    return Err(JexelError::UnsupportedFormat(match code {
                        0xC1 => "extended sequential DCT (SOF1)".to_string(),
                        _ => format!("SOF marker 0xFF{:02X}", code),
                    }));
                }
                JpegMarker::SOS => {
                    self.read_start_of_scan()?;
                    self.decode_scan()?;
                }
                JpegMarker::APP(_) | JpegMarker::COM => self.reader.skip_segment()?,
                JpegMarker::RST(n) => {
                    return Err(JexelError::CorruptJpeg(format!(
                        "restart marker RST{} outside of a scan",
                        n
                    )));
                }
                JpegMarker::SOI => {
                    return Err(JexelError::CorruptJpeg("unexpected second SOI marker".to_string()));
                }
            }
        }

        self.finish()
    }

    fn next_marker(&mut self) -> JexelResult<JpegMarker> {
        let byte = self.reader.read_u8()?;
        if byte != 0xFF {
            return Err(JexelError::CorruptJpeg(format!(
                "expected a marker, found 0x{:02X}",
                byte
            )));
        }

        // Fill 0xFF bytes before a marker are legal
        let mut code = self.reader.read_u8()?;
        while code == 0xFF {
            code = self.reader.read_u8()?;
        }

        JpegMarker::from_u16(0xFF00 | code as u16)
            .ok_or_else(|| JexelError::CorruptJpeg(format!("unknown marker 0xFF{:02X}", code)))
    }

    fn read_quantization_tables(&mut self) -> JexelResult<()> {
        let length = self.reader.read_u16()?;
        let mut remaining = length as i32 - 2;

        while remaining > 0 {
            let table_spec = self.reader.read_u8()?;
            let precision = table_spec >> 4;
            let id = table_spec & 0x0F;

            if precision != 0 {
                return Err(JexelError::UnsupportedFormat(
                    "16-bit quantization tables".to_string(),
                ));
            }
            if id > 3 {
                return Err(JexelError::CorruptJpeg(format!(
                    "quantization table id {} out of range",
                    id
                )));
            }

            // Stored in natural order, the stream carries zigzag order
            let mut table = vec![0u16; 64];
            for i in 0..64 {
                table[ZIGZAG[i] as usize] = self.reader.read_u8()? as u16;
            }

            self.quant_tables[id as usize] = Some(QuantizationTable { id, table });
            remaining -= 65;
        }

        if remaining != 0 {
            return Err(JexelError::CorruptJpeg("DQT segment length mismatch".to_string()));
        }

        Ok(())
    }

    fn read_huffman_tables(&mut self) -> JexelResult<()> {
        let length = self.reader.read_u16()?;
        let mut remaining = length as i32 - 2;

        while remaining > 0 {
            let table_spec = self.reader.read_u8()?;
            let class = table_spec >> 4;
            let id = table_spec & 0x0F;

            if class > 1 {
                return Err(JexelError::CorruptJpeg(format!(
                    "huffman table class {} out of range",
                    class
                )));
            }
            if id > 3 {
                return Err(JexelError::CorruptJpeg(format!(
                    "huffman table id {} out of range",
                    id
                )));
            }

            let mut counts = [0u8; 16];
            let mut total = 0usize;
            for count in counts.iter_mut() {
                *count = self.reader.read_u8()?;
                total += *count as usize;
            }

            if total > 256 {
                return Err(JexelError::CorruptJpeg(format!(
                    "huffman table with {} symbols",
                    total
                )));
            }

            let mut symbols = vec![0u8; total];
            for symbol in symbols.iter_mut() {
                *symbol = self.reader.read_u8()?;
            }

            let table = HuffmanTable::build(&counts, &symbols)?;
            if class == 0 {
                self.dc_tables[id as usize] = Some(table);
            } else {
                self.ac_tables[id as usize] = Some(table);
            }

            remaining -= 17 + total as i32;
        }

        if remaining != 0 {
            return Err(JexelError::CorruptJpeg("DHT segment length mismatch".to_string()));
        }

        Ok(())
    }

    fn read_restart_interval(&mut self) -> JexelResult<()> {
        let length = self.reader.read_u16()?;
        if length != 4 {
            return Err(JexelError::CorruptJpeg(format!("invalid DRI length {}", length)));
        }

        self.restart_interval = self.reader.read_u16()? as u32;

        Ok(())
    }

    fn read_start_of_frame(&mut self, progressive: bool) -> JexelResult<()> {
        if !self.components.is_empty() {
            return Err(JexelError::CorruptJpeg("multiple SOF markers".to_string()));
        }

        let length = self.reader.read_u16()?;
        self.progressive = progressive;

        self.precision = self.reader.read_u8()?;
        if self.precision != 8 {
            return Err(JexelError::UnsupportedFormat(format!(
                "{}-bit sample precision",
                self.precision
            )));
        }

        self.height = self.reader.read_u16()? as u32;
        self.width = self.reader.read_u16()? as u32;
        if self.width == 0 || self.height == 0 {
            return Err(JexelError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        let component_count = self.reader.read_u8()?;
        if component_count != 1 && component_count != 3 {
            return Err(JexelError::UnsupportedFormat(format!(
                "{} color components",
                component_count
            )));
        }

        if length != 8 + 3 * component_count as u16 {
            return Err(JexelError::CorruptJpeg(format!("invalid SOF length {}", length)));
        }

        let mut declared = Vec::with_capacity(component_count as usize);
        let mut max_h = 1u8;
        let mut max_v = 1u8;

        for _ in 0..component_count {
            let id = self.reader.read_u8()?;
            let sampling = self.reader.read_u8()?;
            let h = sampling >> 4;
            let v = sampling & 0x0F;
            let quant_id = self.reader.read_u8()?;

            if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                return Err(JexelError::CorruptJpeg(format!(
                    "sampling factors {}x{} out of range",
                    h, v
                )));
            }
            if quant_id > 3 {
                return Err(JexelError::CorruptJpeg(format!(
                    "quantization table id {} out of range",
                    quant_id
                )));
            }

            max_h = max_h.max(h);
            max_v = max_v.max(v);
            declared.push((id, h, v, quant_id));
        }

        self.max_h = max_h;
        self.max_v = max_v;

        let mcu_pixel_width = 8 * max_h as u32;
        let mcu_pixel_height = 8 * max_v as u32;
        self.mcus_wide = (self.width + mcu_pixel_width - 1) / mcu_pixel_width;
        self.mcus_high = (self.height + mcu_pixel_height - 1) / mcu_pixel_height;

        for (id, h, v, quant_id) in declared {
            // Cropped extent of this component, plus MCU-aligned storage
            let width = (self.width * h as u32 + max_h as u32 - 1) / max_h as u32;
            let height = (self.height * v as u32 + max_v as u32 - 1) / max_v as u32;
            let blocks_wide = self.mcus_wide * h as u32;
            let blocks_high = self.mcus_high * v as u32;

            self.components.push(Component {
                id,
                h_samp: h,
                v_samp: v,
                quant_id,
                dc_id: 0,
                ac_id: 0,
                dc_pred: 0,
                width,
                height,
                blocks_wide,
                blocks_high,
                coeffs: vec![0; (blocks_wide * blocks_high * 64) as usize],
                plane: Plane::new(blocks_wide * 8, blocks_high * 8),
            });
        }

        log_debug!(
            "Frame: {}x{}, {} components, {}",
            self.width,
            self.height,
            self.components.len(),
            if self.progressive { "progressive" } else { "baseline" }
        );

        Ok(())
    }

    fn read_start_of_scan(&mut self) -> JexelResult<()> {
        if self.components.is_empty() {
            return Err(JexelError::CorruptJpeg("SOS before SOF".to_string()));
        }

        let length = self.reader.read_u16()?;
        let count = self.reader.read_u8()?;

        if count != 1 && count != 3 {
            return Err(JexelError::CorruptJpeg(format!(
                "invalid scan component count {}",
                count
            )));
        }
        if length != 6 + 2 * count as u16 {
            return Err(JexelError::CorruptJpeg(format!("invalid SOS length {}", length)));
        }

        self.scan_components.clear();
        for _ in 0..count {
            let id = self.reader.read_u8()?;
            let selectors = self.reader.read_u8()?;
            let dc_id = selectors >> 4;
            let ac_id = selectors & 0x0F;

            if dc_id > 3 || ac_id > 3 {
                return Err(JexelError::CorruptJpeg(format!(
                    "huffman table selectors {}/{} out of range",
                    dc_id, ac_id
                )));
            }

            let ci = self
                .components
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| {
                    JexelError::CorruptJpeg(format!("scan references unknown component {}", id))
                })?;

            self.components[ci].dc_id = dc_id;
            self.components[ci].ac_id = ac_id;
            self.scan_components.push(ci);
        }

        let start = self.reader.read_u8()?;
        let end = self.reader.read_u8()?;
        let approx = self.reader.read_u8()?;
        let high = approx >> 4;
        let low = approx & 0x0F;

        if self.progressive {
            if start > 63 || end > 63 || start > end || high > 13 || low > 13 {
                return Err(JexelError::CorruptJpeg(
                    "spectral selection out of range".to_string(),
                ));
            }
            // A scan refines either the DC coefficient or an AC band, never both
            if start == 0 && end != 0 {
                return Err(JexelError::CorruptJpeg(
                    "progressive scan mixes DC and AC coefficients".to_string(),
                ));
            }
            if start > 0 && count != 1 {
                return Err(JexelError::CorruptJpeg(
                    "progressive AC scan must have a single component".to_string(),
                ));
            }
        } else if start != 0 || end != 63 || high != 0 || low != 0 {
            return Err(JexelError::CorruptJpeg(
                "invalid spectral selection for a baseline scan".to_string(),
            ));
        }

        self.spectral_start = start;
        self.spectral_end = end;
        self.approx_high = high;
        self.approx_low = low;

        self.scans.push(ScanInfo {
            start_spectral: start,
            end_spectral: end,
            successive_high: high,
            successive_low: low,
            component_ids: self.scan_components.iter().map(|&ci| self.components[ci].id).collect(),
        });

        // Entropy decoding starts fresh for every scan
        self.reader.clear_buffer();
        for comp in &mut self.components {
            comp.dc_pred = 0;
        }
        self.eob_run = 0;

        Ok(())
    }

    fn decode_scan(&mut self) -> JexelResult<()> {
        let mut todo = if self.restart_interval > 0 {
            self.restart_interval
        } else {
            u32::MAX
        };

        if self.scan_components.len() == 1 {
            // Non-interleaved: walk the component's cropped block grid
            let ci = self.scan_components[0];
            let blocks_wide = (self.components[ci].width + 7) / 8;
            let blocks_high = (self.components[ci].height + 7) / 8;
            let total = blocks_wide as u64 * blocks_high as u64;
            let mut done = 0u64;

            for row in 0..blocks_high {
                for col in 0..blocks_wide {
                    self.decode_block_at(ci, col, row)?;
                    done += 1;

                    todo -= 1;
                    if todo == 0 {
                        if done < total {
                            self.process_restart()?;
                        }
                        todo = self.restart_interval;
                    }
                }
            }
        } else {
            // Interleaved: MCUs in raster order, components in scan order,
            // blocks within a component in row-major order
            let total = self.mcus_wide as u64 * self.mcus_high as u64;
            let mut done = 0u64;

            for mcu_y in 0..self.mcus_high {
                for mcu_x in 0..self.mcus_wide {
                    for k in 0..self.scan_components.len() {
                        let ci = self.scan_components[k];
                        let h_samp = self.components[ci].h_samp as u32;
                        let v_samp = self.components[ci].v_samp as u32;

                        for v in 0..v_samp {
                            for h in 0..h_samp {
                                self.decode_block_at(ci, mcu_x * h_samp + h, mcu_y * v_samp + v)?;
                            }
                        }
                    }
                    done += 1;

                    todo -= 1;
                    if todo == 0 {
                        if done < total {
                            self.process_restart()?;
                        }
                        todo = self.restart_interval;
                    }
                }
            }
        }

        self.reader.clear_buffer();

        Ok(())
    }

    fn decode_block_at(&mut self, ci: usize, col: u32, row: u32) -> JexelResult<()> {
        let progressive = self.progressive;
        let spectral_start = self.spectral_start;
        let spectral_end = self.spectral_end;
        let approx_high = self.approx_high;
        let approx_low = self.approx_low;

        let comp = &mut self.components[ci];
        let dc_id = comp.dc_id as usize;
        let ac_id = comp.ac_id as usize;
        let offset = ((row * comp.blocks_wide + col) * 64) as usize;
        let block = &mut comp.coeffs[offset..offset + 64];

        if !progressive {
            let dc_table = self.dc_tables[dc_id].as_ref().ok_or_else(|| missing_table("DC", dc_id))?;
            let ac_table = self.ac_tables[ac_id].as_ref().ok_or_else(|| missing_table("AC", ac_id))?;

            Self::decode_block_baseline(&mut self.reader, block, dc_table, ac_table, &mut comp.dc_pred)
        } else if spectral_start == 0 {
            if approx_high == 0 {
                let dc_table =
                    self.dc_tables[dc_id].as_ref().ok_or_else(|| missing_table("DC", dc_id))?;

                Self::decode_block_dc_first(&mut self.reader, block, dc_table, &mut comp.dc_pred, approx_low)
            } else {
                Self::decode_block_dc_refine(&mut self.reader, block, approx_low)
            }
        } else {
            let ac_table = self.ac_tables[ac_id].as_ref().ok_or_else(|| missing_table("AC", ac_id))?;

            if approx_high == 0 {
                Self::decode_block_ac_first(
                    &mut self.reader,
                    block,
                    ac_table,
                    &mut self.eob_run,
                    spectral_start,
                    spectral_end,
                    approx_low,
                )
            } else {
                Self::decode_block_ac_refine(
                    &mut self.reader,
                    block,
                    ac_table,
                    &mut self.eob_run,
                    spectral_start,
                    spectral_end,
                    approx_low,
                )
            }
        }
    }

    /// Consumes one Huffman-coded symbol from the bit stream.
    fn next_symbol(reader: &mut BitReader<R>, table: &HuffmanTable) -> JexelResult<u8> {
        if reader.bits_available() < 16 {
            reader.fill_bits()?;
        }

        let probe = reader.peek_bits(FAST_BITS as u32) as usize;
        let fast = table.fast[probe];
        if fast != 0xFF {
            let size = table.sizes[fast as usize] as u32;
            if size > reader.bits_available() {
                return Err(JexelError::CorruptJpeg(
                    "huffman code longer than available bits".to_string(),
                ));
            }
            reader.consume_bits(size);
            return Ok(table.values[fast as usize]);
        }

        // Codes longer than the fast table: compare the top 16 bits against
        // the preshifted per-length maximum codes
        let top = reader.peek_bits(16);
        let mut length = FAST_BITS + 1;
        while top >= table.max_code[length] {
            length += 1;
        }

        if length == 17 || length as u32 > reader.bits_available() {
            return Err(JexelError::CorruptJpeg("invalid huffman code".to_string()));
        }

        let index = reader.peek_bits(length as u32) as i32 + table.delta[length];
        if !(0..256).contains(&index) {
            return Err(JexelError::CorruptJpeg("invalid huffman code".to_string()));
        }

        reader.consume_bits(length as u32);

        Ok(table.values[index as usize])
    }

    fn decode_block_baseline(
        reader: &mut BitReader<R>,
        block: &mut [i16],
        dc_table: &HuffmanTable,
        ac_table: &HuffmanTable,
        dc_pred: &mut i32,
    ) -> JexelResult<()> {
        block.fill(0);

        let t = Self::next_symbol(reader, dc_table)?;
        if t > 15 {
            return Err(JexelError::CorruptJpeg(format!("invalid DC category {}", t)));
        }

        let diff = if t > 0 { reader.read_signed(t)? } else { 0 };
        let dc = dc_pred.wrapping_add(diff);
        *dc_pred = dc;
        block[0] = dc as i16;

        let mut k = 1usize;
        while k < 64 {
            let rs = Self::next_symbol(reader, ac_table)?;
            let run = (rs >> 4) as usize;
            let size = rs & 0x0F;

            if size == 0 {
                if rs != 0xF0 {
                    break; // end of block
                }
                k += 16;
            } else {
                k += run;
                if k >= 64 {
                    return Err(JexelError::CorruptJpeg("zigzag index out of range".to_string()));
                }

                let value = reader.read_signed(size)?;
                block[ZIGZAG[k] as usize] = value as i16;
                k += 1;
            }
        }

        Ok(())
    }

    fn decode_block_dc_first(
        reader: &mut BitReader<R>,
        block: &mut [i16],
        dc_table: &HuffmanTable,
        dc_pred: &mut i32,
        approx_low: u8,
    ) -> JexelResult<()> {
        block.fill(0);

        let t = Self::next_symbol(reader, dc_table)?;
        if t > 15 {
            return Err(JexelError::CorruptJpeg(format!("invalid DC category {}", t)));
        }

        let diff = if t > 0 { reader.read_signed(t)? } else { 0 };
        let dc = dc_pred.wrapping_add(diff);
        *dc_pred = dc;
        block[0] = dc.wrapping_shl(approx_low as u32) as i16;

        Ok(())
    }

    fn decode_block_dc_refine(
        reader: &mut BitReader<R>,
        block: &mut [i16],
        approx_low: u8,
    ) -> JexelResult<()> {
        if reader.read_bit()? != 0 {
            block[0] |= 1 << approx_low;
        }

        Ok(())
    }

    fn decode_block_ac_first(
        reader: &mut BitReader<R>,
        block: &mut [i16],
        ac_table: &HuffmanTable,
        eob_run: &mut u32,
        spectral_start: u8,
        spectral_end: u8,
        approx_low: u8,
    ) -> JexelResult<()> {
        if *eob_run > 0 {
            *eob_run -= 1;
            return Ok(());
        }

        let mut k = spectral_start as usize;
        loop {
            let rs = Self::next_symbol(reader, ac_table)?;
            let run = (rs >> 4) as usize;
            let size = rs & 0x0F;

            if size == 0 {
                if run < 15 {
                    // Start an end-of-block run; this block is its first member
                    let mut length = 1u32 << run;
                    if run > 0 {
                        length += reader.read_bits(run as u8)?;
                    }
                    *eob_run = length - 1;
                    break;
                }
                k += 16;
            } else {
                k += run;
                if k > 63 {
                    return Err(JexelError::CorruptJpeg("zigzag index out of range".to_string()));
                }

                let value = reader.read_signed(size)?;
                block[ZIGZAG[k] as usize] = value.wrapping_shl(approx_low as u32) as i16;
                k += 1;
            }

            if k > spectral_end as usize {
                break;
            }
        }

        Ok(())
    }

    fn decode_block_ac_refine(
        reader: &mut BitReader<R>,
        block: &mut [i16],
        ac_table: &HuffmanTable,
        eob_run: &mut u32,
        spectral_start: u8,
        spectral_end: u8,
        approx_low: u8,
    ) -> JexelResult<()> {
        let bit = 1i16 << approx_low;

        if *eob_run > 0 {
            // A pending end-of-block run only refines existing coefficients
            *eob_run -= 1;

            for k in spectral_start as usize..=spectral_end as usize {
                let p = &mut block[ZIGZAG[k] as usize];
                if *p != 0 && reader.read_bit()? != 0 && (*p & bit) == 0 {
                    if *p > 0 {
                        *p += bit;
                    } else {
                        *p -= bit;
                    }
                }
            }

            return Ok(());
        }

        let mut k = spectral_start as usize;
        loop {
            let rs = Self::next_symbol(reader, ac_table)?;
            let mut run = (rs >> 4) as i32;
            let size = rs & 0x0F;
            let mut value = 0i16;

            if size == 0 {
                if run < 15 {
                    let mut length = (1u32 << run) - 1;
                    if run > 0 {
                        length += reader.read_bits(run as u8)?;
                    }
                    *eob_run = length;
                    run = 64; // sweep to the end of the block below
                }
                // run == 15 is a plain 16-zero skip
            } else {
                if size != 1 {
                    return Err(JexelError::CorruptJpeg(
                        "invalid coefficient size in refinement scan".to_string(),
                    ));
                }
                value = if reader.read_bit()? != 0 { bit } else { -bit };
            }

            // Advance over `run` zero coefficients, refining every nonzero
            // one passed along the way, then place the new value
            while k <= spectral_end as usize {
                let p = &mut block[ZIGZAG[k] as usize];
                k += 1;

                if *p != 0 {
                    if reader.read_bit()? != 0 && (*p & bit) == 0 {
                        if *p > 0 {
                            *p += bit;
                        } else {
                            *p -= bit;
                        }
                    }
                } else {
                    if run == 0 {
                        if value != 0 {
                            block[ZIGZAG[k - 1] as usize] = value;
                        }
                        break;
                    }
                    run -= 1;
                }
            }

            if k > spectral_end as usize {
                break;
            }
        }

        Ok(())
    }

    fn process_restart(&mut self) -> JexelResult<()> {
        // Remaining accumulator bits are padding before the marker
        self.reader.clear_buffer();

        let b0 = self.reader.read_u8()?;
        let b1 = self.reader.read_u8()?;
        if b0 != 0xFF || !(0xD0..=0xD7).contains(&b1) {
            return Err(JexelError::CorruptJpeg(format!(
                "expected a restart marker, found 0x{:02X}{:02X}",
                b0, b1
            )));
        }

        for comp in &mut self.components {
            comp.dc_pred = 0;
        }
        self.eob_run = 0;

        Ok(())
    }

    fn finish(&mut self) -> JexelResult<Image> {
        if self.components.is_empty() || self.scans.is_empty() {
            return Err(JexelError::CorruptJpeg(
                "no frame or scan data before EOI".to_string(),
            ));
        }

        for ci in 0..self.components.len() {
            let quant_id = self.components[ci].quant_id as usize;
            let quant = self.quant_tables[quant_id].as_ref().ok_or_else(|| {
                JexelError::CorruptJpeg(format!("missing quantization table {}", quant_id))
            })?;
            let comp = &mut self.components[ci];

            let mut block = [0i32; 64];
            for row in 0..comp.blocks_high {
                for col in 0..comp.blocks_wide {
                    let offset = ((row * comp.blocks_wide + col) * 64) as usize;
                    for i in 0..64 {
                        block[i] = comp.coeffs[offset + i] as i32 * quant.table[i] as i32;
                    }

                    idct_block(&block, &mut comp.plane, col * 8, row * 8);
                }
            }
        }

        if self.components.len() == 1 {
            let plane = self.upsampled_plane(0)?;
            Ok(self.gray_to_rgba(&plane))
        } else {
            let y = self.upsampled_plane(0)?;
            let cb = self.upsampled_plane(1)?;
            let cr = self.upsampled_plane(2)?;
            Ok(self.ycbcr_to_rgba(&y, &cb, &cr))
        }
    }

    /// Doubles the component's plane in X and Y until its sampling factors
    /// reach the frame maxima.
    fn upsampled_plane(&self, ci: usize) -> JexelResult<Plane> {
        let comp = &self.components[ci];
        let mut plane = comp.plane.clone();

        let mut h = comp.h_samp;
        while h < self.max_h {
            plane = double_width(&plane);
            h <<= 1;
        }
        if h != self.max_h {
            return Err(JexelError::UnsupportedFormat(format!(
                "horizontal sampling ratio {}:{} is not a power of two",
                self.max_h, comp.h_samp
            )));
        }

        let mut v = comp.v_samp;
        while v < self.max_v {
            plane = double_height(&plane);
            v <<= 1;
        }
        if v != self.max_v {
            return Err(JexelError::UnsupportedFormat(format!(
                "vertical sampling ratio {}:{} is not a power of two",
                self.max_v, comp.v_samp
            )));
        }

        Ok(plane)
    }

    fn gray_to_rgba(&self, plane: &Plane) -> Image {
        let mut luma = Vec::with_capacity((self.width * self.height) as usize);

        for y in 0..self.height {
            for x in 0..self.width {
                luma.push(plane.get(x, y));
            }
        }

        Image::from_pixels(self.width, self.height, PixelData::L8(luma)).into_rgba8()
    }

    fn ycbcr_to_rgba(&self, y: &Plane, cb: &Plane, cr: &Plane) -> Image {
        // Rec. 601 factors as round(k * 4096) << 8, applied in 20-bit
        // fixed point
        const CR_R: i32 = 5743 << 8; // 1.40200
        const CR_G: i32 = -(2925 << 8); // 0.71414
        const CB_G: i32 = -(1410 << 8); // 0.34414
        const CB_B: i32 = 7258 << 8; // 1.77200

        let mut image = Image::new(self.width, self.height);

        for py in 0..self.height {
            for px in 0..self.width {
                let luma = ((y.get(px, py) as i32) << 20) + (1 << 19);
                let cb_v = cb.get(px, py) as i32 - 128;
                let cr_v = cr.get(px, py) as i32 - 128;

                let r = luma + cr_v * CR_R;
                // The Cb contribution drops its low 16 bits before the sum
                let g = luma + cr_v * CR_G + ((cb_v * CB_G) & -65536);
                let b = luma + cb_v * CB_B;

                image.set_pixel(
                    px,
                    py,
                    [clamp_u8(r >> 20), clamp_u8(g >> 20), clamp_u8(b >> 20), 255],
                );
            }
        }

        image
    }
}

fn missing_table(class: &str, id: usize) -> JexelError {
    JexelError::CorruptJpeg(format!("scan references missing {} huffman table {}", class, id))
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// One dimension of the fixed-point inverse DCT. Constants are
/// round(k * 4096) from the AAN factorization; arithmetic wraps, inputs are
/// bounded so results stay within i32 before the final clamp.
#[inline]
fn idct_1d(s: [i32; 8]) -> (i32, i32, i32, i32, i32, i32, i32, i32) {
    // even half
    let mut p2 = s[2];
    let mut p3 = s[6];
    let mut p1 = p2.wrapping_add(p3).wrapping_mul(2217); // 0.5411961
    let t2 = p1.wrapping_add(p3.wrapping_mul(-7567)); // -1.847759065
    let t3 = p1.wrapping_add(p2.wrapping_mul(3135)); // 0.765366865
    p2 = s[0];
    p3 = s[4];
    let t0 = p2.wrapping_add(p3).wrapping_mul(4096);
    let t1 = p2.wrapping_sub(p3).wrapping_mul(4096);
    let x0 = t0.wrapping_add(t3);
    let x3 = t0.wrapping_sub(t3);
    let x1 = t1.wrapping_add(t2);
    let x2 = t1.wrapping_sub(t2);

    // odd half
    let mut t0 = s[7];
    let mut t1 = s[5];
    let mut t2 = s[3];
    let mut t3 = s[1];
    p3 = t0.wrapping_add(t2);
    let mut p4 = t1.wrapping_add(t3);
    p1 = t0.wrapping_add(t3);
    p2 = t1.wrapping_add(t2);
    let p5 = p3.wrapping_add(p4).wrapping_mul(4816); // 1.175875602
    t0 = t0.wrapping_mul(1223); // 0.298631336
    t1 = t1.wrapping_mul(8410); // 2.053119869
    t2 = t2.wrapping_mul(12586); // 3.072711026
    t3 = t3.wrapping_mul(6149); // 1.501321110
    p1 = p5.wrapping_add(p1.wrapping_mul(-3685)); // -0.899976223
    p2 = p5.wrapping_add(p2.wrapping_mul(-10497)); // -2.562915447
    p3 = p3.wrapping_mul(-8034); // -1.961570560
    p4 = p4.wrapping_mul(-1597); // -0.390180644
    t3 = t3.wrapping_add(p1.wrapping_add(p4));
    t2 = t2.wrapping_add(p2.wrapping_add(p3));
    t1 = t1.wrapping_add(p2.wrapping_add(p4));
    t0 = t0.wrapping_add(p1.wrapping_add(p3));

    (x0, x1, x2, x3, t0, t1, t2, t3)
}

/// 2D inverse DCT of one dequantized block into the sample plane at
/// (ox, oy). Vertical pass first with a +512 rounding bias and a 10-bit
/// descale, then horizontal with the combined descale and the level shift
/// from the signed DCT domain into bytes.
fn idct_block(data: &[i32; 64], plane: &mut Plane, ox: u32, oy: u32) {
    let mut tmp = [0i32; 64];

    for i in 0..8 {
        let d = [
            data[i],
            data[i + 8],
            data[i + 16],
            data[i + 24],
            data[i + 32],
            data[i + 40],
            data[i + 48],
            data[i + 56],
        ];

        // All-AC-zero column: the DC term spreads down unchanged
        if d[1..].iter().all(|&v| v == 0) {
            let dc = d[0].wrapping_mul(4);
            for row in 0..8 {
                tmp[row * 8 + i] = dc;
            }
            continue;
        }

        let (x0, x1, x2, x3, t0, t1, t2, t3) = idct_1d(d);

        let x0 = x0.wrapping_add(512);
        let x1 = x1.wrapping_add(512);
        let x2 = x2.wrapping_add(512);
        let x3 = x3.wrapping_add(512);

        tmp[i] = x0.wrapping_add(t3) >> 10;
        tmp[56 + i] = x0.wrapping_sub(t3) >> 10;
        tmp[8 + i] = x1.wrapping_add(t2) >> 10;
        tmp[48 + i] = x1.wrapping_sub(t2) >> 10;
        tmp[16 + i] = x2.wrapping_add(t1) >> 10;
        tmp[40 + i] = x2.wrapping_sub(t1) >> 10;
        tmp[24 + i] = x3.wrapping_add(t0) >> 10;
        tmp[32 + i] = x3.wrapping_sub(t0) >> 10;
    }

    for row in 0..8 {
        let r = &tmp[row * 8..row * 8 + 8];
        let (x0, x1, x2, x3, t0, t1, t2, t3) =
            idct_1d([r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]]);

        // Rounding for the 17-bit descale plus the +128 level shift
        const BIAS: i32 = 65536 + (128 << 17);
        let x0 = x0.wrapping_add(BIAS);
        let x1 = x1.wrapping_add(BIAS);
        let x2 = x2.wrapping_add(BIAS);
        let x3 = x3.wrapping_add(BIAS);

        let y = oy + row as u32;
        plane.set(ox, y, clamp_u8(x0.wrapping_add(t3) >> 17));
        plane.set(ox + 7, y, clamp_u8(x0.wrapping_sub(t3) >> 17));
        plane.set(ox + 1, y, clamp_u8(x1.wrapping_add(t2) >> 17));
        plane.set(ox + 6, y, clamp_u8(x1.wrapping_sub(t2) >> 17));
        plane.set(ox + 2, y, clamp_u8(x2.wrapping_add(t1) >> 17));
        plane.set(ox + 5, y, clamp_u8(x2.wrapping_sub(t1) >> 17));
        plane.set(ox + 3, y, clamp_u8(x3.wrapping_add(t0) >> 17));
        plane.set(ox + 4, y, clamp_u8(x3.wrapping_sub(t0) >> 17));
    }
}

/// Doubles a plane horizontally with a smooth 3:1 filter. Edge samples are
/// copied, interior outputs average the near sample with its neighbor.
fn double_width(input: &Plane) -> Plane {
    let w = input.width();
    let h = input.height();
    let mut out = Plane::new(w * 2, h);

    for y in 0..h {
        for x in 0..w {
            let near = input.get(x, y) as u32;

            let left = if x == 0 {
                near
            } else {
                (3 * near + input.get(x - 1, y) as u32 + 2) >> 2
            };
            let right = if x == w - 1 {
                near
            } else {
                (3 * near + input.get(x + 1, y) as u32 + 2) >> 2
            };

            out.set(2 * x, y, left as u8);
            out.set(2 * x + 1, y, right as u8);
        }
    }

    out
}

fn double_height(input: &Plane) -> Plane {
    let w = input.width();
    let h = input.height();
    let mut out = Plane::new(w, h * 2);

    for y in 0..h {
        for x in 0..w {
            let near = input.get(x, y) as u32;

            let up = if y == 0 {
                near
            } else {
                (3 * near + input.get(x, y - 1) as u32 + 2) >> 2
            };
            let down = if y == h - 1 {
                near
            } else {
                (3 * near + input.get(x, y + 1) as u32 + 2) >> 2
            };

            out.set(x, 2 * y, up as u8);
            out.set(x, 2 * y + 1, down as u8);
        }
    }

    out
}
