//! Frame decoding — base64 payload (optionally a data URI) to an RGB pixel buffer.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero extent")]
    ZeroSized,
}

/// Strip a `data:<mime>;base64,` prefix. Keeps everything after the last comma.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.rfind(',') {
        Some(idx) => &payload[idx + 1..],
        None => payload,
    }
}

/// Decode a base64 payload to raw bytes, tolerating a data-URI prefix and
/// embedded whitespace.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let body: String = strip_data_uri(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = PAYLOAD_ENGINE.decode(body.as_bytes())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}

/// Decode an encoded still image into an RGB8 buffer.
pub fn decode_frame(payload: &str) -> Result<RgbImage, DecodeError> {
    let bytes = decode_payload(payload)?;
    let rgb = image::load_from_memory(&bytes)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(DecodeError::ZeroSized);
    }
    Ok(rgb)
}

/// Encode `image` as a PNG data URI, the way browser clients send frames.
#[cfg(test)]
pub(crate) fn png_payload(image: &RgbImage) -> String {
    use std::io::Cursor;
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(buf))
}
