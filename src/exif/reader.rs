use std::collections::BTreeMap;
use std::io::Cursor;

use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use nom_exif::{EntryValue, Exif, ExifIter, ExifTag, MediaParser, MediaSource};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::settings::SettingsRecord;
use crate::settings::units::{format_aperture, format_shutter};

// WhiteBalance (Exif IFD)
const TAG_WHITE_BALANCE: u16 = 0xA403;

/// Opaque blobs longer than this (maker notes, embedded profiles) are left
/// out of the tag map.
const MAX_UNDEFINED_LEN: usize = 64;

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Container facts plus the camera settings embedded in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Upper-case container name (`"JPEG"`, `"PNG"`, ...).
    pub format: String,
    /// Pixel layout (`"RGB"`, `"RGBA"`, `"L"`, ...).
    pub mode: String,
    pub size: ImageSize,
    pub camera_settings: SettingsRecord,
    /// Every main-image EXIF tag, by tag name, as display text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exif: BTreeMap<String, String>,
}

/// Extract container info and camera settings from raw image bytes.
///
/// Fails only when the bytes are not a decodable image. Missing or partial
/// EXIF is not an error: unknown tags are simply absent in the record.
pub fn extract_metadata(bytes: &[u8]) -> Result<ImageMetadata, EngineError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(EngineError::unreadable)?;
    let format = reader
        .format()
        .ok_or_else(|| EngineError::UnreadableImage("unrecognized image container".into()))?;
    let decoder = reader.into_decoder().map_err(EngineError::unreadable)?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();

    let (camera_settings, exif) = match parse_exif(bytes) {
        Some(iter) => {
            let tags = tag_map(iter.clone_and_rewind());
            (camera_settings(&iter.into()), tags)
        }
        None => (SettingsRecord::default(), BTreeMap::new()),
    };

    Ok(ImageMetadata {
        format: format_name(format),
        mode: mode_name(color),
        size: ImageSize { width, height },
        camera_settings,
        exif,
    })
}

/// Read capture settings from the EXIF block, if there is one.
pub fn read_camera_settings(bytes: &[u8]) -> SettingsRecord {
    parse_exif(bytes)
        .map(|iter| camera_settings(&iter.into()))
        .unwrap_or_default()
}

fn parse_exif(bytes: &[u8]) -> Option<ExifIter> {
    let mut parser = MediaParser::new();
    let ms = match MediaSource::seekable(Cursor::new(bytes)) {
        Ok(ms) => ms,
        Err(e) => {
            log::debug!("No EXIF container recognized: {e}");
            return None;
        }
    };

    match parser.parse(ms) {
        Ok(iter) => Some(iter),
        Err(_) => {
            log::debug!("No EXIF data found");
            None
        }
    }
}

fn camera_settings(exif: &Exif) -> SettingsRecord {
    let mut record = SettingsRecord::default();

    // ISO
    record.iso = exif
        .get(ExifTag::ISOSpeedRatings)
        .and_then(entry_to_f64)
        .map(|iso| iso.round())
        .filter(|iso| *iso >= 1.0 && *iso <= u32::MAX as f64)
        .map(|iso| iso as u32);

    // Aperture / FNumber. Manual lenses often record 0.
    record.aperture = exif
        .get(ExifTag::FNumber)
        .and_then(entry_to_positive)
        .map(format_aperture);

    // Shutter speed / ExposureTime
    record.shutter_speed = exif
        .get(ExifTag::ExposureTime)
        .and_then(entry_to_positive)
        .and_then(format_shutter);

    record.focal_length = exif
        .get(ExifTag::FocalLength)
        .and_then(entry_to_positive)
        .map(|mm| format!("{mm:.1}mm"));

    record.camera_make = exif.get(ExifTag::Make).and_then(entry_to_string);
    record.camera_model = exif.get(ExifTag::Model).and_then(entry_to_string);
    record.lens_model = exif.get(ExifTag::LensModel).and_then(entry_to_string);

    record.white_balance = exif
        .get_by_ifd_tag_code(0, TAG_WHITE_BALANCE)
        .and_then(entry_to_f64)
        .and_then(|wb| match wb as u32 {
            0 => Some("Auto".to_string()),
            1 => Some("Manual".to_string()),
            _ => None,
        });

    record
}

/// Main-image tags keyed by name; unrecognized tags use their hex code.
fn tag_map(iter: ExifIter) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for entry in iter.filter(|e| e.ifd_index() == 0) {
        let Some(value) = entry.get_value().and_then(tag_value) else {
            continue;
        };
        let name = match entry.tag() {
            Some(tag) => tag.to_string(),
            None => format!("0x{:04x}", entry.tag_code()),
        };
        tags.entry(name).or_insert(value);
    }
    tags
}

fn tag_value(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::URational(r) => Some(format!("{}/{}", r.0, r.1)),
        EntryValue::IRational(r) => Some(format!("{}/{}", r.0, r.1)),
        EntryValue::Undefined(v) if v.len() > MAX_UNDEFINED_LEN => None,
        other => entry_to_string(other),
    }
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').trim_matches('\0').trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Numeric value of a rational, integer or float entry. Zero-denominator
/// rationals and negative values are treated as absent.
fn entry_to_f64(val: &EntryValue) -> Option<f64> {
    let value = match val {
        EntryValue::URational(r) => ratio(r.0 as f64, r.1 as f64)?,
        EntryValue::IRational(r) => ratio(r.0 as f64, r.1 as f64)?,
        EntryValue::U8(v) => *v as f64,
        EntryValue::U16(v) => *v as f64,
        EntryValue::U32(v) => *v as f64,
        EntryValue::U64(v) => *v as f64,
        EntryValue::F32(v) => *v as f64,
        EntryValue::F64(v) => *v,
        other => other.to_string().trim().parse::<f64>().ok()?,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Like [`entry_to_f64`], but zero is absent too.
fn entry_to_positive(val: &EntryValue) -> Option<f64> {
    entry_to_f64(val).filter(|v| *v > 0.0)
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 { None } else { Some(num / den) }
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

fn mode_name(color: ColorType) -> String {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 => "RGB;16",
        ColorType::Rgba16 => "RGBA;16",
        ColorType::Rgb32F => "RGB;F",
        ColorType::Rgba32F => "RGBA;F",
        other => return format!("{other:?}"),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::units::{is_aperture, is_shutter_speed};
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn plain_jpeg() -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([120, 90, 60]))),
            ImageFormat::Jpeg,
        )
    }

    // Minimal little-endian TIFF IFD entry.
    struct Tag {
        id: u16,
        kind: u16,
        count: u32,
        data: Vec<u8>,
    }

    fn ascii(id: u16, s: &str) -> Tag {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        Tag { id, kind: 2, count: data.len() as u32, data }
    }

    fn short(id: u16, v: u16) -> Tag {
        Tag { id, kind: 3, count: 1, data: v.to_le_bytes().to_vec() }
    }

    fn long(id: u16, v: u32) -> Tag {
        Tag { id, kind: 4, count: 1, data: v.to_le_bytes().to_vec() }
    }

    fn rational(id: u16, num: u32, den: u32) -> Tag {
        let mut data = num.to_le_bytes().to_vec();
        data.extend(den.to_le_bytes());
        Tag { id, kind: 5, count: 1, data }
    }

    fn ifd_len(tags: &[Tag]) -> usize {
        let out_of_line: usize = tags
            .iter()
            .filter(|t| t.data.len() > 4)
            .map(|t| t.data.len() + t.data.len() % 2)
            .sum();
        2 + tags.len() * 12 + 4 + out_of_line
    }

    fn write_ifd(out: &mut Vec<u8>, tags: &[Tag]) {
        let data_start = out.len() + 2 + tags.len() * 12 + 4;
        let mut data = Vec::new();
        out.extend((tags.len() as u16).to_le_bytes());
        for t in tags {
            out.extend(t.id.to_le_bytes());
            out.extend(t.kind.to_le_bytes());
            out.extend(t.count.to_le_bytes());
            if t.data.len() <= 4 {
                let mut inline = t.data.clone();
                inline.resize(4, 0);
                out.extend(inline);
            } else {
                out.extend(((data_start + data.len()) as u32).to_le_bytes());
                data.extend(&t.data);
                if data.len() % 2 == 1 {
                    data.push(0);
                }
            }
        }
        out.extend(0u32.to_le_bytes());
        out.extend(data);
    }

    /// A JPEG whose APP1 segment carries a small camera EXIF block.
    fn jpeg_with_exif() -> Vec<u8> {
        jpeg_with_exif_ifd(vec![
            rational(0x829A, 1, 250), // ExposureTime
            rational(0x829D, 28, 10), // FNumber
            short(0x8827, 800),       // ISOSpeedRatings
            rational(0x920A, 50, 1),  // FocalLength
            short(0xA403, 0),         // WhiteBalance
            ascii(0xA434, "RF 50mm F1.8 STM"),
        ])
    }

    fn jpeg_with_exif_ifd(exif_ifd: Vec<Tag>) -> Vec<u8> {
        let mut ifd0 = vec![ascii(0x010F, "Canon"), ascii(0x0110, "EOS R5"), long(0x8769, 0)];
        let exif_offset = 8 + ifd_len(&ifd0);
        ifd0[2] = long(0x8769, exif_offset as u32);

        let mut tiff = b"II*\0".to_vec();
        tiff.extend(8u32.to_le_bytes());
        write_ifd(&mut tiff, &ifd0);
        write_ifd(&mut tiff, &exif_ifd);

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend(tiff);

        let base = plain_jpeg();
        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend(((app1.len() + 2) as u16).to_be_bytes());
        out.extend(app1);
        out.extend(&base[2..]);
        out
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = extract_metadata(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EngineError::UnreadableImage(_)));
    }

    #[test]
    fn truncated_jpeg_is_unreadable() {
        let err = extract_metadata(&[0xFF, 0xD8, 0xFF]).unwrap_err();
        assert!(matches!(err, EngineError::UnreadableImage(_)));
    }

    #[test]
    fn empty_input_is_unreadable() {
        assert!(matches!(
            extract_metadata(&[]),
            Err(EngineError::UnreadableImage(_))
        ));
    }

    #[test]
    fn jpeg_without_exif_has_no_camera_fields() {
        let meta = extract_metadata(&plain_jpeg()).unwrap();
        assert_eq!(meta.format, "JPEG");
        assert_eq!(meta.mode, "RGB");
        assert_eq!(meta.size, ImageSize { width: 32, height: 24 });
        assert_eq!(meta.camera_settings, SettingsRecord::default());
    }

    #[test]
    fn png_reports_format_and_mode() {
        let png = encode(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 7, Rgba([0, 0, 0, 128]))),
            ImageFormat::Png,
        );
        let meta = extract_metadata(&png).unwrap();
        assert_eq!(meta.format, "PNG");
        assert_eq!(meta.mode, "RGBA");
        assert_eq!(meta.size, ImageSize { width: 5, height: 7 });
        assert!(meta.camera_settings.has_no_exposure());
    }

    #[test]
    fn jpeg_with_exif_yields_camera_settings() {
        let meta = extract_metadata(&jpeg_with_exif()).unwrap();
        assert_eq!(meta.format, "JPEG");

        let s = meta.camera_settings;
        assert_eq!(s.iso, Some(800));
        assert_eq!(s.aperture.as_deref(), Some("f/2.8"));
        assert_eq!(s.shutter_speed.as_deref(), Some("1/250s"));
        assert_eq!(s.focal_length.as_deref(), Some("50.0mm"));
        assert_eq!(s.camera_make.as_deref(), Some("Canon"));
        assert_eq!(s.camera_model.as_deref(), Some("EOS R5"));
        assert_eq!(s.lens_model.as_deref(), Some("RF 50mm F1.8 STM"));
        assert_eq!(s.white_balance.as_deref(), Some("Auto"));
        assert!(is_aperture(s.aperture.as_deref().unwrap()));
        assert!(is_shutter_speed(s.shutter_speed.as_deref().unwrap()));
    }

    #[test]
    fn jpeg_with_exif_lists_every_tag() {
        let meta = extract_metadata(&jpeg_with_exif()).unwrap();
        let tags = &meta.exif;
        assert_eq!(tags.get("Make").map(String::as_str), Some("Canon"));
        assert_eq!(tags.get("Model").map(String::as_str), Some("EOS R5"));
        assert_eq!(tags.get("ExposureTime").map(String::as_str), Some("1/250"));
        assert_eq!(tags.get("FNumber").map(String::as_str), Some("28/10"));
        assert_eq!(tags.get("ISOSpeedRatings").map(String::as_str), Some("800"));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["exif"]["Make"], "Canon");
    }

    #[test]
    fn jpeg_without_exif_omits_tag_map() {
        let meta = extract_metadata(&plain_jpeg()).unwrap();
        assert!(meta.exif.is_empty());
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("exif").is_none());
    }

    #[test]
    fn zero_exposure_values_are_absent() {
        // Manual lenses record FNumber 0/1; some bodies write ExposureTime 0/1.
        let bytes = jpeg_with_exif_ifd(vec![
            rational(0x829A, 0, 1),
            rational(0x829D, 0, 1),
            short(0x8827, 400),
            rational(0x920A, 0, 1),
            short(0xA403, 1),
        ]);
        let s = extract_metadata(&bytes).unwrap().camera_settings;
        assert_eq!(s.aperture, None);
        assert_eq!(s.shutter_speed, None);
        assert_eq!(s.focal_length, None);
        assert_eq!(s.iso, Some(400));
        assert_eq!(s.white_balance.as_deref(), Some("Manual"));
    }

    #[test]
    fn zero_denominator_is_absent() {
        assert_eq!(entry_to_f64(&EntryValue::URational((28u32, 0u32).into())), None);
        assert_eq!(entry_to_f64(&EntryValue::URational((28u32, 10u32).into())), Some(2.8));
        assert_eq!(entry_to_f64(&EntryValue::U16(400)), Some(400.0));
        assert_eq!(entry_to_f64(&EntryValue::U16(0)), Some(0.0));
        assert_eq!(entry_to_positive(&EntryValue::U16(0)), None);
        assert_eq!(entry_to_positive(&EntryValue::URational((0u32, 1u32).into())), None);
    }

    #[test]
    fn format_and_mode_names() {
        assert_eq!(format_name(ImageFormat::WebP), "WEBP");
        assert_eq!(mode_name(ColorType::L8), "L");
        assert_eq!(mode_name(ColorType::Rgb16), "RGB;16");
    }
}
