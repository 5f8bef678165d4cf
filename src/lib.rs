mod decoders;
mod utils;

pub use decoders::jpeg::{ColorComponentInfo, JpegDecoder, JpegMode, QuantizationTable, ScanInfo};
pub use utils::error::{JexelError, JexelResult};
pub use utils::image::{Image, PixelData, PixelFormat, Plane};
pub use utils::info::JpegInfo;

use serde::Serialize;
use std::io::{Cursor, Read, Seek};
use tsify::Tsify;
use wasm_bindgen::prelude::wasm_bindgen;

/// Decodes a JPEG image from a byte slice.
pub fn decode(data: &[u8]) -> JexelResult<Image> {
    JpegDecoder::new(Cursor::new(data)).decode()
}

/// Decodes a JPEG image from any seekable byte source.
pub fn decode_reader<R: Read + Seek>(reader: R) -> JexelResult<Image> {
    JpegDecoder::new(reader).decode()
}

/// Encoding is not implemented; this always fails.
pub fn encode(_image: &Image) -> JexelResult<Vec<u8>> {
    Err(JexelError::UnsupportedFormat(
        "JPEG encoding is not supported".to_string(),
    ))
}

#[derive(Serialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct JsImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[wasm_bindgen(js_name = decodeImage)]
pub fn decode_image(data: &[u8]) -> Result<JsImage, String> {
    let image = decode(data).map_err(|e| e.to_string())?;

    Ok(JsImage {
        width: image.width(),
        height: image.height(),
        pixels: image.as_rgba8(),
    })
}

#[wasm_bindgen(js_name = getInfo)]
pub fn get_info(data: &[u8]) -> Result<JpegInfo, String> {
    let mut decoder = JpegDecoder::new(Cursor::new(data));
    decoder.decode().map_err(|e| e.to_string())?;

    Ok(decoder.get_info())
}
