//! Image payload decoding
//!
//! Turns a base64 or data-URI image payload into the bytes and metadata
//! needed for a PDF image XObject. JPEG data and plain PNG data are
//! embedded as-is (`DCTDecode` / `FlateDecode` with the PNG predictor);
//! PNGs carrying transparency are decoded and split into a colour stream
//! and a soft mask.

use std::io::Write;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::debug;

use crate::error::StampError;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: [u8; 2] = [0xFF, 0xD8];

/// Cap on the decoded sample buffer for PNGs that need re-encoding.
/// Matches the `png` crate's default decoder limit.
const MAX_DECODED_PNG_BYTES: u64 = 64 * 1024 * 1024;

/// Standard alphabet, padding optional. Browsers and form encoders are
/// not consistent about trailing `=`.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Classify raw bytes by their leading signature.
    pub fn sniff(bytes: &[u8]) -> Option<ImageFormat> {
        if bytes.starts_with(&PNG_SIGNATURE) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&JPEG_SIGNATURE) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    /// Map a declared media type such as `image/png` to a format.
    pub fn from_mime(mime: &str) -> Option<ImageFormat> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// An image payload after base64 decoding, with the header read.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// The original encoded file bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRgb,
    DeviceCmyk,
    /// Palette of packed RGB triples.
    Indexed { palette: Vec<u8> },
}

/// `/DecodeParms` for PNG-predicted flate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngPredictor {
    pub colors: u8,
    pub bits_per_component: u8,
    pub columns: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    Dct,
    Flate { predictor: Option<PngPredictor> },
}

/// Everything needed to write an image XObject (and its soft mask).
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub bits_per_component: u8,
    pub filter: ImageFilter,
    pub decode: Option<Vec<f32>>,
    pub data: Vec<u8>,
    /// Zlib-compressed 8-bit alpha samples, one per pixel.
    pub soft_mask: Option<Vec<u8>>,
}

/// Decode a data-URI or bare base64 payload and read the image header.
pub fn decode_image(payload: &str) -> Result<DecodedImage, StampError> {
    let (mime, body) = split_data_uri(payload.trim())?;

    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let data = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| StampError::MalformedImageData(format!("Invalid base64: {}", e)))?;

    let format = match mime.and_then(ImageFormat::from_mime) {
        Some(format) => format,
        None => ImageFormat::sniff(&data).ok_or_else(|| {
            StampError::UnsupportedImageFormat(match mime {
                Some(m) => format!("{} (expected PNG or JPEG)", m),
                None => "payload is neither PNG nor JPEG".to_string(),
            })
        })?,
    };

    let (width, height) = match format {
        ImageFormat::Png => {
            let header = png_header(&data)?;
            (header.width, header.height)
        }
        ImageFormat::Jpeg => {
            let frame = jpeg_frame(&data)?;
            (frame.width, frame.height)
        }
    };

    if width == 0 || height == 0 {
        return Err(StampError::MalformedImageData(format!(
            "Image has zero dimension ({}x{})",
            width, height
        )));
    }

    debug!(?format, width, height, bytes = data.len(), "decoded image payload");

    Ok(DecodedImage {
        format,
        width,
        height,
        data,
    })
}

/// Build the XObject payload for a decoded image.
pub fn to_pdf_image(image: &DecodedImage) -> Result<EmbeddedImage, StampError> {
    match image.format {
        ImageFormat::Jpeg => jpeg_to_pdf(image),
        ImageFormat::Png => png_to_pdf(image),
    }
}

/// Split `data:image/png;base64,AAAA` into its media type and body.
/// Anything not starting with `data:` is taken as bare base64.
fn split_data_uri(payload: &str) -> Result<(Option<&str>, &str), StampError> {
    let is_data_uri = payload
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("data:"));
    if !is_data_uri {
        return Ok((None, payload));
    }

    let (header, body) = payload[5..]
        .split_once(',')
        .ok_or_else(|| StampError::MalformedImageData("Data URI has no payload".to_string()))?;

    let mut params = header.split(';');
    let mime = params.next().map(str::trim).filter(|m| !m.is_empty());
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(StampError::MalformedImageData(
            "Data URI is not base64-encoded".to_string(),
        ));
    }

    Ok((mime, body))
}

// ============================================================
// PNG
// ============================================================

#[derive(Debug, Clone, Copy)]
struct PngHeader {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: u8,
    interlaced: bool,
}

struct PngChunks<'a> {
    header: PngHeader,
    palette: Option<&'a [u8]>,
    has_transparency: bool,
    image_data: Vec<u8>,
}

/// Read the IHDR chunk, which the format requires to come first.
fn png_header(data: &[u8]) -> Result<PngHeader, StampError> {
    if !data.starts_with(&PNG_SIGNATURE) {
        return Err(StampError::MalformedImageData(
            "Missing PNG signature".to_string(),
        ));
    }
    if data.len() < 33 || &data[12..16] != b"IHDR" {
        return Err(StampError::MalformedImageData(
            "PNG IHDR chunk missing or truncated".to_string(),
        ));
    }

    Ok(PngHeader {
        width: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        height: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        bit_depth: data[24],
        color_type: data[25],
        interlaced: data[28] != 0,
    })
}

fn png_chunks(data: &[u8]) -> Result<PngChunks<'_>, StampError> {
    let header = png_header(data)?;
    let mut palette = None;
    let mut has_transparency = false;
    let mut image_data = Vec::new();

    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let kind = &data[pos + 4..pos + 8];
        let start = pos + 8;
        let end = start
            .checked_add(len)
            .filter(|end| end + 4 <= data.len())
            .ok_or_else(|| StampError::MalformedImageData("PNG chunk truncated".to_string()))?;
        let body = &data[start..end];

        match kind {
            b"PLTE" => palette = Some(body),
            b"tRNS" => has_transparency = true,
            b"IDAT" => image_data.extend_from_slice(body),
            b"IEND" => break,
            _ => {}
        }
        pos = end + 4;
    }

    if image_data.is_empty() {
        return Err(StampError::MalformedImageData(
            "PNG has no IDAT data".to_string(),
        ));
    }

    Ok(PngChunks {
        header,
        palette,
        has_transparency,
        image_data,
    })
}

fn png_to_pdf(image: &DecodedImage) -> Result<EmbeddedImage, StampError> {
    let chunks = png_chunks(&image.data)?;
    let header = chunks.header;

    let passthrough = !header.interlaced
        && header.bit_depth <= 8
        && !chunks.has_transparency
        && matches!(header.color_type, 0 | 2 | 3);
    if !passthrough {
        debug!(
            color_type = header.color_type,
            bit_depth = header.bit_depth,
            interlaced = header.interlaced,
            "png needs decoding before embedding"
        );
        return decode_png_pixels(image, header);
    }

    let color_space = match header.color_type {
        0 => ColorSpace::DeviceGray,
        2 => ColorSpace::DeviceRgb,
        _ => {
            let palette = chunks.palette.ok_or_else(|| {
                StampError::MalformedImageData("Indexed PNG has no PLTE chunk".to_string())
            })?;
            if palette.is_empty() || palette.len() % 3 != 0 || palette.len() > 768 {
                return Err(StampError::MalformedImageData(format!(
                    "PNG palette has invalid length {}",
                    palette.len()
                )));
            }
            ColorSpace::Indexed {
                palette: palette.to_vec(),
            }
        }
    };

    let colors = if header.color_type == 2 { 3 } else { 1 };

    Ok(EmbeddedImage {
        width: header.width,
        height: header.height,
        color_space,
        bits_per_component: header.bit_depth,
        filter: ImageFilter::Flate {
            predictor: Some(PngPredictor {
                colors,
                bits_per_component: header.bit_depth,
                columns: header.width,
            }),
        },
        decode: None,
        data: chunks.image_data,
        soft_mask: None,
    })
}

/// Decode the PNG to 8-bit samples and split off the alpha channel.
fn decode_png_pixels(image: &DecodedImage, header: PngHeader) -> Result<EmbeddedImage, StampError> {
    // The header is attacker-controlled; size the output before allocating.
    // After normalisation a pixel is at most four 8-bit samples.
    u64::from(header.width)
        .checked_mul(u64::from(header.height))
        .and_then(|pixels| pixels.checked_mul(4))
        .filter(|bytes| *bytes <= MAX_DECODED_PNG_BYTES)
        .ok_or_else(|| {
            StampError::MalformedImageData(format!(
                "PNG of {}x{} exceeds the {} MiB decode limit",
                header.width,
                header.height,
                MAX_DECODED_PNG_BYTES / (1024 * 1024)
            ))
        })?;

    let mut decoder = png::Decoder::new(image.data.as_slice());
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| StampError::MalformedImageData(format!("PNG decode error: {}", e)))?;

    let size = reader.output_buffer_size();
    if size as u64 > MAX_DECODED_PNG_BYTES {
        return Err(StampError::MalformedImageData(format!(
            "PNG output buffer of {} bytes exceeds the decode limit",
            size
        )));
    }
    let mut buf = vec![0u8; size];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| StampError::MalformedImageData(format!("PNG frame error: {}", e)))?;
    buf.truncate(info.buffer_size());

    let (color_space, samples, alpha) = match info.color_type {
        png::ColorType::Grayscale => (ColorSpace::DeviceGray, buf, None),
        png::ColorType::Rgb => (ColorSpace::DeviceRgb, buf, None),
        png::ColorType::GrayscaleAlpha => {
            let (gray, alpha) = split_alpha(&buf, 1);
            (ColorSpace::DeviceGray, gray, Some(alpha))
        }
        png::ColorType::Rgba => {
            let (rgb, alpha) = split_alpha(&buf, 3);
            (ColorSpace::DeviceRgb, rgb, Some(alpha))
        }
        other => {
            return Err(StampError::MalformedImageData(format!(
                "Unexpected PNG colour type after expansion: {:?}",
                other
            )))
        }
    };

    // A fully opaque alpha channel adds nothing but bytes.
    let alpha = alpha.filter(|a| a.iter().any(|&v| v != u8::MAX));

    let soft_mask = match alpha {
        Some(alpha) => Some(zlib_compress(&alpha)?),
        None => None,
    };

    Ok(EmbeddedImage {
        width: info.width,
        height: info.height,
        color_space,
        bits_per_component: 8,
        filter: ImageFilter::Flate { predictor: None },
        decode: None,
        data: zlib_compress(&samples)?,
        soft_mask,
    })
}

/// Separate interleaved `color_channels + 1` samples into colour and alpha.
fn split_alpha(buf: &[u8], color_channels: usize) -> (Vec<u8>, Vec<u8>) {
    let stride = color_channels + 1;
    let pixels = buf.len() / stride;
    let mut color = Vec::with_capacity(pixels * color_channels);
    let mut alpha = Vec::with_capacity(pixels);
    for px in buf.chunks_exact(stride) {
        color.extend_from_slice(&px[..color_channels]);
        alpha.push(px[color_channels]);
    }
    (color, alpha)
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StampError::MalformedImageData(format!("Flate encode error: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StampError::MalformedImageData(format!("Flate encode error: {}", e)))
}

// ============================================================
// JPEG
// ============================================================

#[derive(Debug, Clone, Copy)]
struct JpegFrame {
    width: u32,
    height: u32,
    precision: u8,
    components: u8,
}

/// Walk the marker segments up to the first SOF marker.
fn jpeg_frame(data: &[u8]) -> Result<JpegFrame, StampError> {
    if !data.starts_with(&JPEG_SIGNATURE) {
        return Err(StampError::MalformedImageData(
            "Missing JPEG SOI marker".to_string(),
        ));
    }

    let mut i = 2;
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = data[i + 1];

        // Fill bytes and stuffed zeros
        if marker == 0xFF || marker == 0x00 {
            i += 1;
            continue;
        }
        // Standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD8).contains(&marker) {
            i += 2;
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            break;
        }

        // SOF0-SOF15, except DHT (C4), JPG (C8) and DAC (CC)
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof {
            if i + 9 >= data.len() {
                return Err(StampError::MalformedImageData(
                    "JPEG SOF segment truncated".to_string(),
                ));
            }
            return Ok(JpegFrame {
                precision: data[i + 4],
                height: u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32,
                width: u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32,
                components: data[i + 9],
            });
        }

        if i + 3 >= data.len() {
            break;
        }
        let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        if seg_len < 2 {
            break;
        }
        i += 2 + seg_len;
    }

    Err(StampError::MalformedImageData(
        "No SOF marker found in JPEG data".to_string(),
    ))
}

fn jpeg_to_pdf(image: &DecodedImage) -> Result<EmbeddedImage, StampError> {
    let frame = jpeg_frame(&image.data)?;

    let (color_space, decode) = match frame.components {
        1 => (ColorSpace::DeviceGray, None),
        3 => (ColorSpace::DeviceRgb, None),
        // Adobe writes CMYK JPEGs inverted
        4 => (
            ColorSpace::DeviceCmyk,
            Some(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]),
        ),
        n => {
            return Err(StampError::MalformedImageData(format!(
                "Unsupported JPEG component count: {}",
                n
            )))
        }
    };

    Ok(EmbeddedImage {
        width: frame.width,
        height: frame.height,
        color_space,
        bits_per_component: frame.precision,
        filter: ImageFilter::Dct,
        decode,
        data: image.data.clone(),
        soft_mask: None,
    })
}

#[cfg(test)]
pub(crate) mod test_images {
    //! Small in-memory images shared by the unit tests.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn png(width: u32, height: u32, color: png::ColorType) -> Vec<u8> {
        let channels = match color {
            png::ColorType::Grayscale => 1,
            png::ColorType::GrayscaleAlpha => 2,
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
            png::ColorType::Indexed => 1,
        };
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            if color == png::ColorType::Indexed {
                encoder.set_palette(vec![255, 0, 0, 0, 0, 255]);
            }
            let mut writer = encoder.write_header().unwrap();
            let mut pixels = vec![0u8; (width * height) as usize * channels];
            // Half-transparent alpha so the mask survives
            if matches!(color, png::ColorType::Rgba | png::ColorType::GrayscaleAlpha) {
                for px in pixels.chunks_exact_mut(channels) {
                    px[channels - 1] = 128;
                }
            }
            writer.write_image_data(&pixels).unwrap();
        }
        out
    }

    /// SOI, APP0, SOF0 and EOI: enough for header parsing.
    pub fn jpeg(width: u16, height: u16, components: u8) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(&[
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0x00,
        ]);
        let seg_len = 8 + 3 * components as u16;
        out.extend_from_slice(&[0xFF, 0xC0]);
        out.extend_from_slice(&seg_len.to_be_bytes());
        out.push(8);
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&width.to_be_bytes());
        out.push(components);
        for id in 1..=components {
            out.extend_from_slice(&[id, 0x11, 0x00]);
        }
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    /// An RGBA PNG whose IHDR claims `width`x`height` but whose pixel
    /// data is only one pixel. The IHDR CRC is rewritten to stay valid.
    pub fn png_with_forged_size(width: u32, height: u32) -> Vec<u8> {
        let mut data = png(1, 1, png::ColorType::Rgba);
        data[16..20].copy_from_slice(&width.to_be_bytes());
        data[20..24].copy_from_slice(&height.to_be_bytes());
        let mut crc = flate2::Crc::new();
        crc.update(&data[12..29]);
        data[29..33].copy_from_slice(&crc.sum().to_be_bytes());
        data
    }

    pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
    }

    pub fn bare(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }
}
