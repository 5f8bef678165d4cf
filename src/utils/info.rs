use crate::decoders::jpeg::{ColorComponentInfo, JpegMode, QuantizationTable, ScanInfo};
use serde::Serialize;
use tsify::Tsify;

/// Metadata gathered while parsing a JPEG stream, exposed through
/// [`JpegDecoder::get_info`](crate::JpegDecoder::get_info) and the wasm
/// `getInfo` entry point. APP and COM payloads are skipped during decoding,
/// so nothing here comes from EXIF/JFIF/ICC data.
#[derive(Debug, Clone, Serialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u8,
    pub number_of_components: u8,
    pub mode: JpegMode,
    pub color_components: Vec<ColorComponentInfo>,
    pub quantization_tables: Vec<QuantizationTable>,
    pub restart_interval: u32,
    pub scans: Vec<ScanInfo>,
}
