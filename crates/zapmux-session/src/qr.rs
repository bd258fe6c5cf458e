//! QR rendering for the pairing flow.
//!
//! The dashboard polls for the QR as a `data:` URL so it can drop the code
//! straight into an `<img>` tag without another round trip.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageBuffer, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use zapmux_core::ZapError;

/// Render a pairing code as a PNG.
pub fn to_png(code: &str) -> Result<Vec<u8>, ZapError> {
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| ZapError::Session(format!("failed to encode QR: {e}")))?;

    let image: ImageBuffer<Luma<u8>, Vec<u8>> = qr
        .render::<Luma<u8>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ZapError::Session(format!("failed to render QR PNG: {e}")))?;
    Ok(png)
}

/// Render a pairing code as a base64 `data:image/png` URL.
pub fn to_data_url(code: &str) -> Result<String, ZapError> {
    let png = to_png(code)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_png() {
        let png = to_png("2@abcdef,ghijkl,mnopqr").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn data_url_has_png_prefix() {
        let url = to_data_url("2@abcdef,ghijkl,mnopqr").unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(url.len() > 100);
    }
}
