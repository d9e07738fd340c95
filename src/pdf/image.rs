//! Media part decoding for PDF embedding.
//!
//! JPEG bytes pass through untouched (the PDF DCTDecode filter consumes
//! them natively); PNG decodes to raw RGB with the alpha channel split off
//! into an SMask. Anything else is rejected and renders as a placeholder.

use std::io::Cursor;

/// A decoded media part ready for XObject embedding.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixel_data: PixelData,
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Debug, Clone)]
pub enum PixelData {
    /// Raw JPEG bytes, embedded with `/DCTDecode`.
    Jpeg { data: Vec<u8>, gray: bool },
    /// Decoded RGB bytes plus an optional grayscale alpha plane.
    Raw { rgb: Vec<u8>, alpha: Option<Vec<u8>> },
}

pub fn decode(data: &[u8]) -> Result<DecodedImage, String> {
    if data.len() < 4 {
        return Err("image data too short".to_string());
    }
    if is_jpeg(data) {
        decode_jpeg(data)
    } else if is_png(data) {
        decode_png(data)
    } else {
        Err("unsupported image format (JPEG and PNG are embedded)".to_string())
    }
}

fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

fn is_png(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == [0x89, 0x50, 0x4E, 0x47]
}

fn decode_jpeg(data: &[u8]) -> Result<DecodedImage, String> {
    let reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| format!("JPEG detection failed: {e}"))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| format!("unreadable JPEG dimensions: {e}"))?;

    Ok(DecodedImage {
        pixel_data: PixelData::Jpeg { data: data.to_vec(), gray: jpeg_is_grayscale(data) },
        width_px: width,
        height_px: height,
    })
}

/// Walk JPEG markers to the SOF segment and read the component count.
fn jpeg_is_grayscale(data: &[u8]) -> bool {
    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            break;
        }
        let marker = data[i + 1];
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof {
            if i + 9 < data.len() {
                return data[i + 9] == 1;
            }
            break;
        }
        if i + 3 < data.len() {
            let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
            i += 2 + seg_len;
        } else {
            break;
        }
    }
    false
}

fn decode_png(data: &[u8]) -> Result<DecodedImage, String> {
    let reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| format!("PNG detection failed: {e}"))?;
    let img = reader.decode().map_err(|e| format!("PNG decode failed: {e}"))?;

    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    let pixel_count = (width * height) as usize;

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);
    let mut transparent = false;
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
        if pixel[3] != 255 {
            transparent = true;
        }
    }

    Ok(DecodedImage {
        pixel_data: PixelData::Raw { rgb, alpha: transparent.then_some(alpha) },
        width_px: width,
        height_px: height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(pixels: &[(u8, u8, u8, u8)], w: u32, h: u32) -> Vec<u8> {
        let mut img = image::RgbaImage::new(w, h);
        for (i, &(r, g, b, a)) in pixels.iter().enumerate() {
            img.put_pixel(i as u32 % w, i as u32 / w, image::Rgba([r, g, b, a]));
        }
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(encoder, img.as_raw(), w, h, image::ColorType::Rgba8)
            .unwrap();
        buf
    }

    #[test]
    fn test_magic_detection() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(is_png(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!is_png(&[0xFF, 0xD8, 0xFF, 0xE0]));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(decode(&[1, 2, 3, 4, 5]).is_err());
        assert!(decode(&[1]).is_err());
    }

    #[test]
    fn test_png_opaque_drops_alpha() {
        let buf = encode_png(&[(255, 0, 0, 255)], 1, 1);
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.width_px, 1);
        match decoded.pixel_data {
            PixelData::Raw { rgb, alpha } => {
                assert_eq!(rgb, vec![255, 0, 0]);
                assert!(alpha.is_none());
            }
            _ => panic!("PNG must decode to raw pixels"),
        }
    }

    #[test]
    fn test_png_transparency_kept() {
        let buf = encode_png(&[(0, 255, 0, 128)], 1, 1);
        let decoded = decode(&buf).unwrap();
        match decoded.pixel_data {
            PixelData::Raw { alpha, .. } => assert_eq!(alpha.unwrap(), vec![128]),
            _ => panic!(),
        }
    }

    #[test]
    fn test_jpeg_passthrough() {
        let img = image::RgbImage::from_fn(2, 2, |_, _| image::Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new(&mut buf);
        image::ImageEncoder::write_image(encoder, img.as_raw(), 2, 2, image::ColorType::Rgb8)
            .unwrap();

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.width_px, 2);
        match decoded.pixel_data {
            PixelData::Jpeg { data, gray } => {
                assert!(data.starts_with(&[0xFF, 0xD8]));
                assert!(!gray);
            }
            _ => panic!("JPEG must pass through"),
        }
    }
}
