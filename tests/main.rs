#[cfg(test)]
mod tests {
    use jexel::{decode, decode_reader, encode, Image, JexelError, JpegDecoder, JpegMode, PixelData, PixelFormat};
    use std::io::Cursor;

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFF, marker];
        bytes.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn quantization_all_ones() -> Vec<u8> {
        let mut payload = vec![0x00];
        payload.extend([1u8; 64]);
        segment(0xDB, &payload)
    }

    fn huffman(class: u8, id: u8, counts: [u8; 16], symbols: &[u8]) -> Vec<u8> {
        let mut payload = vec![(class << 4) | id];
        payload.extend_from_slice(&counts);
        payload.extend_from_slice(symbols);
        segment(0xC4, &payload)
    }

    /// Table holding the single symbol 0 as a one-bit code.
    fn single_symbol_table(class: u8) -> Vec<u8> {
        let mut counts = [0u8; 16];
        counts[0] = 1;
        huffman(class, 0, counts, &[0x00])
    }

    /// DC table with category 0 as "0" and category 4 as "10".
    fn dc_table_with_categories() -> Vec<u8> {
        let mut counts = [0u8; 16];
        counts[0] = 1;
        counts[1] = 1;
        huffman(0, 0, counts, &[0x00, 0x04])
    }

    fn start_of_frame(marker: u8, width: u16, height: u16, components: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut payload = vec![8];
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&width.to_be_bytes());
        payload.push(components.len() as u8);
        for &(id, sampling, quant) in components {
            payload.extend_from_slice(&[id, sampling, quant]);
        }
        segment(marker, &payload)
    }

    fn start_of_scan(components: &[(u8, u8)], start: u8, end: u8, approx: u8) -> Vec<u8> {
        let mut payload = vec![components.len() as u8];
        for &(id, selectors) in components {
            payload.extend_from_slice(&[id, selectors]);
        }
        payload.extend_from_slice(&[start, end, approx]);
        segment(0xDA, &payload)
    }

    /// Entropy bytes for `count` blocks that are each a zero DC difference
    /// followed by an end-of-block symbol, two 0-bits per block, padded
    /// with 1-bits.
    fn zero_blocks(count: usize) -> Vec<u8> {
        let total_bits = count * 2;
        let mut bytes = vec![0u8; total_bits / 8];
        let rem = total_bits % 8;
        if rem > 0 {
            bytes.push(((1u16 << (8 - rem)) - 1) as u8);
        }
        bytes
    }

    fn gray_baseline(width: u16, height: u16, entropy: &[u8]) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC0, width, height, &[(1, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 63, 0));
        jpeg.extend_from_slice(entropy);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn baseline_grayscale_solid_gray() {
        let image = decode(&gray_baseline(8, 8, &zero_blocks(1))).unwrap();

        assert_eq!((image.width(), image.height()), (8, 8));
        assert_eq!(image.pixel_format(), PixelFormat::RGBA8);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn pixel_data_conversions() {
        let image = Image::from_pixels(2, 1, PixelData::L8(vec![0, 200]));
        assert_eq!(image.pixel_format(), PixelFormat::L8);
        assert_eq!(image.get_pixel(1, 0), [200, 200, 200, 255]);

        let rgba = image.into_rgba8();
        assert_eq!(rgba.pixel_format(), PixelFormat::RGBA8);
        assert_eq!(rgba.as_rgba8(), vec![0, 0, 0, 255, 200, 200, 200, 255]);
        assert_eq!(rgba.as_rgb8(), vec![0, 0, 0, 200, 200, 200]);

        let rgb = rgba.into_rgb8();
        assert_eq!(rgb.pixel_format(), PixelFormat::RGB8);
        assert_eq!(rgb.get_pixel(1, 0), [200, 200, 200, 255]);
    }

    #[test]
    fn dimensions_follow_the_frame_header() {
        // 11x7 does not fill its MCU grid; the output must still be exact
        let image = decode(&gray_baseline(11, 7, &zero_blocks(2))).unwrap();

        assert_eq!((image.width(), image.height()), (11, 7));
        assert_eq!(image.as_rgba8().len(), 11 * 7 * 4);
        assert_eq!(image.as_rgb8().len(), 11 * 7 * 3);
    }

    #[test]
    fn baseline_ycbcr_single_pixel() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC0, 1, 1, &[(1, 0x11, 0), (2, 0x11, 0), (3, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00), (2, 0x00), (3, 0x00)], 0, 63, 0));
        jpeg.extend(zero_blocks(3));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        assert_eq!((image.width(), image.height()), (1, 1));
        assert_eq!(image.get_pixel(0, 0), [128, 128, 128, 255]);
    }

    #[test]
    fn ycbcr_conversion_applies_chroma() {
        // Cb block decodes to 129, giving a slight blue cast
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(dc_table_with_categories());
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC0, 8, 8, &[(1, 0x11, 0), (2, 0x11, 0), (3, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00), (2, 0x00), (3, 0x00)], 0, 63, 0));
        // Y: zero; Cb: DC difference +8; Cr: zero
        jpeg.extend_from_slice(&[0x28, 0x1F]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 130, 255]);
            }
        }
    }

    #[test]
    fn baseline_420_chroma_upsampling() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC0, 16, 16, &[(1, 0x22, 0), (2, 0x11, 0), (3, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00), (2, 0x00), (3, 0x00)], 0, 63, 0));
        // One MCU: four luma blocks plus one block per chroma plane
        jpeg.extend(zero_blocks(6));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        assert_eq!((image.width(), image.height()), (16, 16));
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn restart_marker_resets_dc_prediction() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(dc_table_with_categories());
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(segment(0xDD, &[0x00, 0x01])); // restart after every block
        jpeg.extend(start_of_frame(0xC0, 16, 8, &[(1, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 63, 0));
        // First block: DC difference +8, then EOB
        jpeg.extend_from_slice(&[0xA1, 0xFF, 0xD0]);
        // Second block: zero difference; it only decodes to mid-gray if the
        // restart marker reset the predictor
        jpeg.push(0x3F);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for x in 0..16 {
                let expected = if x < 8 { 129 } else { 128 };
                let [r, g, b, a] = image.get_pixel(x, y);
                assert_eq!(r, expected);
                assert_eq!((g, b, a), (r, r, 255));
            }
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let jpeg = gray_baseline(8, 8, &zero_blocks(1));
        let first = decode(&jpeg).unwrap();
        let second = decode_reader(Cursor::new(jpeg)).unwrap();

        assert_eq!(first.as_rgba8(), second.as_rgba8());
    }

    #[test]
    fn progressive_dc_only_image() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(start_of_frame(0xC2, 8, 8, &[(1, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 0, 0x00));
        jpeg.push(0x7F); // zero DC difference
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn progressive_dc_and_ac_scans() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC2, 8, 8, &[(1, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 0, 0x00));
        jpeg.push(0x7F);
        jpeg.extend(start_of_scan(&[(1, 0x00)], 1, 63, 0x00));
        jpeg.push(0x7F); // immediate end-of-block run
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let mut decoder = JpegDecoder::new(Cursor::new(jpeg));
        let image = decoder.decode().unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 128, 255]);
            }
        }

        let info = decoder.get_info();
        assert_eq!(info.mode, JpegMode::Progressive);
        assert_eq!(info.scans.len(), 2);
    }

    #[test]
    fn progressive_interleaved_dc_scan() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(start_of_frame(0xC2, 8, 8, &[(1, 0x11, 0), (2, 0x11, 0), (3, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00), (2, 0x00), (3, 0x00)], 0, 0, 0x00));
        jpeg.push(0x1F); // three zero DC differences
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [128, 128, 128, 255]);
            }
        }
    }

    #[test]
    fn progressive_dc_refinement_adds_a_bit_plane() {
        // DC table with the single symbol "category 2"
        let mut counts = [0u8; 16];
        counts[0] = 1;
        let dc = huffman(0, 0, counts, &[0x02]);

        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(quantization_all_ones());
        jpeg.extend(dc);
        jpeg.extend(start_of_frame(0xC2, 8, 8, &[(1, 0x11, 0)]));
        // First DC scan at Al = 3: difference +2, stored as 16
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 0, 0x03));
        jpeg.push(0x5F);
        // Refinement at Ah = 3, Al = 2: a set bit adds 4
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 0, 0x32));
        jpeg.extend_from_slice(&[0xFF, 0x00]); // all-ones byte, stuffed
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(image.get_pixel(x, y), [131, 131, 131, 255]);
            }
        }
    }

    #[test]
    fn app_and_com_segments_are_skipped() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(segment(0xE0, b"JFIF\0\x01\x02\x00\x00\x01\x00\x01\x00\x00"));
        jpeg.extend(segment(0xFE, b"not metadata, just bytes"));
        jpeg.extend(quantization_all_ones());
        jpeg.extend(single_symbol_table(0));
        jpeg.extend(single_symbol_table(1));
        jpeg.extend(start_of_frame(0xC0, 8, 8, &[(1, 0x11, 0)]));
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 63, 0));
        jpeg.extend(zero_blocks(1));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        let image = decode(&jpeg).unwrap();
        assert_eq!(image.get_pixel(3, 3), [128, 128, 128, 255]);
    }

    #[test]
    fn info_reports_frame_parameters() {
        let mut decoder = JpegDecoder::new(Cursor::new(gray_baseline(8, 8, &zero_blocks(1))));
        decoder.decode().unwrap();

        let info = decoder.get_info();
        assert_eq!((info.width, info.height), (8, 8));
        assert_eq!(info.color_depth, 8);
        assert_eq!(info.mode, JpegMode::Baseline);
        assert_eq!(info.number_of_components, 1);
        assert_eq!(info.quantization_tables.len(), 1);
        assert_eq!(info.scans.len(), 1);
    }

    #[test]
    fn empty_image_is_a_structural_error() {
        let err = decode(&[0xFF, 0xD8, 0xFF, 0xD9]).unwrap_err();
        assert!(matches!(err, JexelError::CorruptJpeg(_)));
    }

    #[test]
    fn missing_soi_is_rejected() {
        assert!(decode(&[0x00, 0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn sof1_is_unsupported() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(start_of_frame(0xC1, 8, 8, &[(1, 0x11, 0)]));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        match decode(&jpeg).unwrap_err() {
            JexelError::UnsupportedFormat(reason) => assert!(reason.contains("extended sequential")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn twelve_bit_precision_is_unsupported() {
        let payload = [12, 0, 8, 0, 8, 1, 1, 0x11, 0];
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(segment(0xC0, &payload));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        assert!(matches!(
            decode(&jpeg).unwrap_err(),
            JexelError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn sixteen_bit_quantization_is_unsupported() {
        let mut payload = vec![0x10]; // precision 1, table 0
        payload.extend([0u8; 128]);
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(segment(0xDB, &payload));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        assert!(matches!(
            decode(&jpeg).unwrap_err(),
            JexelError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn restart_marker_outside_scan_is_rejected() {
        let err = decode(&[0xFF, 0xD8, 0xFF, 0xD0, 0xFF, 0xD9]).unwrap_err();
        assert!(matches!(err, JexelError::CorruptJpeg(_)));
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let err = decode(&[0xFF, 0xD8, 0xFF, 0x01, 0xFF, 0xD9]).unwrap_err();
        assert!(matches!(err, JexelError::CorruptJpeg(_)));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let jpeg = gray_baseline(8, 8, &zero_blocks(1));
        assert!(decode(&jpeg[..jpeg.len() - 20]).is_err());
    }

    #[test]
    fn scan_before_frame_is_rejected() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend(start_of_scan(&[(1, 0x00)], 0, 63, 0));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);

        assert!(matches!(
            decode(&jpeg).unwrap_err(),
            JexelError::CorruptJpeg(_)
        ));
    }

    #[test]
    fn encoding_is_not_supported() {
        let image = decode(&gray_baseline(8, 8, &zero_blocks(1))).unwrap();
        assert!(matches!(
            encode(&image),
            Err(JexelError::UnsupportedFormat(_))
        ));
    }
}
