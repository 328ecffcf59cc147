//! Image loading, validation and shrink-to-fit encoding.
//!
//! [`prepare`] passes a compliant file through untouched. Anything larger than
//! the pixel or byte ceiling is downscaled with Lanczos3 and re-encoded through
//! a scratch file that is removed before the function returns, on every path.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{
    mime_type_for, EncodedPayload, ImageAsset, ImageKind, PrepareOptions, ShrinkOutcome,
};

/// Errors that can occur while preparing an image.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("Image not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unsupported image format '{0}' (supported: JPG, PNG, WEBP, GIF)")]
    UnsupportedFormat(String),

    #[error("Cannot decode image: {0}")]
    CorruptImage(String),

    #[error("Image is {size} bytes after {passes} resize passes, limit is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64, passes: u32 },

    #[error("Invalid prepare options: {0}")]
    InvalidOptions(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read and decode an image, returning its metadata.
///
/// # Errors
///
/// `FileNotFound`, `UnsupportedFormat` or `CorruptImage` as for [`prepare`].
pub fn inspect(path: &Path) -> Result<ImageAsset, PrepareError> {
    load(path).map(|loaded| loaded.asset)
}

/// Produce a base64 payload that satisfies `options`' pixel and byte ceilings.
///
/// The original bytes are returned unchanged when the image already fits.
/// Otherwise the image is scaled to fit `max_pixel_edge` (aspect ratio kept),
/// re-encoded in its own container, and shrunk by `options.strategy` until the
/// encoded size is within `max_bytes` or `max_retries` shrink passes are spent.
///
/// # Errors
///
/// Returns an error if:
/// - The file does not exist (`FileNotFound`)
/// - The extension is not jpg, jpeg, png, webp or gif (`UnsupportedFormat`)
/// - The file cannot be decoded (`CorruptImage`)
/// - The image cannot be shrunk below `max_bytes` (`PayloadTooLarge`)
pub fn prepare(path: &Path, options: &PrepareOptions) -> Result<EncodedPayload, PrepareError> {
    if options.max_pixel_edge == 0 || options.max_bytes == 0 {
        return Err(PrepareError::InvalidOptions(
            "max_pixel_edge and max_bytes must be positive".to_string(),
        ));
    }

    let Loaded {
        asset,
        bytes,
        image,
    } = load(path)?;

    let within_edge =
        asset.width <= options.max_pixel_edge && asset.height <= options.max_pixel_edge;
    if within_edge && asset.byte_size <= options.max_bytes {
        debug!(path = %path.display(), "image within limits, passing through");
        return Ok(EncodedPayload {
            data: encode_base64(&bytes),
            mime_type: mime_type_for(path).to_string(),
            width: asset.width,
            height: asset.height,
            byte_size: asset.byte_size,
            source: asset,
            resize_passes: 0,
            outcome: ShrinkOutcome::Untouched,
        });
    }
    drop(bytes);

    let (image, passes) = if within_edge {
        (image, 0)
    } else {
        debug!(
            width = asset.width,
            height = asset.height,
            max = options.max_pixel_edge,
            "downscaling to pixel limit"
        );
        let edge = options.max_pixel_edge;
        (image.resize(edge, edge, FilterType::Lanczos3), 1)
    };

    let shrunk = shrink_to_fit(image, passes, asset.kind, options)?;
    match shrunk.outcome {
        ShrinkOutcome::MaxRetriesExceeded => Err(PrepareError::PayloadTooLarge {
            size: shrunk.bytes.len() as u64,
            limit: options.max_bytes,
            passes: shrunk.passes,
        }),
        outcome => Ok(EncodedPayload {
            data: encode_base64(&shrunk.bytes),
            mime_type: mime_type_for(path).to_string(),
            width: shrunk.width,
            height: shrunk.height,
            byte_size: shrunk.bytes.len() as u64,
            source: asset,
            resize_passes: shrunk.passes,
            outcome,
        }),
    }
}

struct Loaded {
    asset: ImageAsset,
    bytes: Vec<u8>,
    image: DynamicImage,
}

fn load(path: &Path) -> Result<Loaded, PrepareError> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PrepareError::FileNotFound(path.to_path_buf()),
        _ => PrepareError::Io(e),
    })?;
    if !metadata.is_file() {
        return Err(PrepareError::FileNotFound(path.to_path_buf()));
    }

    let kind = ImageKind::from_path(path).ok_or_else(|| {
        PrepareError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;

    let bytes = std::fs::read(path)?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| PrepareError::CorruptImage(format!("{}: {}", path.display(), e)))?;

    let asset = ImageAsset {
        path: path.to_path_buf(),
        width: image.width(),
        height: image.height(),
        kind,
        byte_size: bytes.len() as u64,
    };

    Ok(Loaded {
        asset,
        bytes,
        image,
    })
}

struct Shrunk {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    passes: u32,
    outcome: ShrinkOutcome,
}

/// Re-encode, then shrink and re-encode at most `max_retries` more times.
fn shrink_to_fit(
    mut image: DynamicImage,
    mut passes: u32,
    kind: ImageKind,
    options: &PrepareOptions,
) -> Result<Shrunk, PrepareError> {
    let mut bytes = encode_via_scratch(&image, kind, options)?;

    for retry in 0..=options.max_retries {
        debug!(
            width = image.width(),
            height = image.height(),
            size = bytes.len(),
            retry,
            "encoded candidate"
        );
        if bytes.len() as u64 <= options.max_bytes {
            return Ok(Shrunk {
                bytes,
                width: image.width(),
                height: image.height(),
                passes,
                outcome: ShrinkOutcome::Fits,
            });
        }
        if retry == options.max_retries {
            break;
        }

        let (w, h) = options.strategy.next_dimensions(image.width(), image.height());
        if (w, h) == (image.width(), image.height()) {
            break;
        }
        image = image.resize_exact(w, h, FilterType::Lanczos3);
        passes += 1;
        bytes = encode_via_scratch(&image, kind, options)?;
    }

    Ok(Shrunk {
        width: image.width(),
        height: image.height(),
        bytes,
        passes,
        outcome: ShrinkOutcome::MaxRetriesExceeded,
    })
}

/// Encode into a named scratch file and read it back. The file is deleted
/// when `scratch` is closed or dropped, including on early `?` returns.
fn encode_via_scratch(
    image: &DynamicImage,
    kind: ImageKind,
    options: &PrepareOptions,
) -> Result<Vec<u8>, PrepareError> {
    let suffix = format!(".{}", kind.extension());
    let mut builder = tempfile::Builder::new();
    builder.prefix("vision-describe-").suffix(&suffix);
    let mut scratch = match options.temp_dir.as_deref() {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }?;

    {
        let mut writer = BufWriter::new(scratch.as_file_mut());
        write_image(image, kind, options.jpeg_quality, &mut writer)?;
        writer.flush()?;
    }

    let bytes = std::fs::read(scratch.path())?;
    scratch.close()?;
    Ok(bytes)
}

fn write_image<W: Write + Seek>(
    image: &DynamicImage,
    kind: ImageKind,
    jpeg_quality: u8,
    writer: &mut W,
) -> Result<(), PrepareError> {
    let result = match kind {
        // JPEG has no alpha channel
        ImageKind::Jpeg => image
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut *writer, jpeg_quality)),
        ImageKind::Png => image.write_to(writer, image::ImageFormat::Png),
        ImageKind::WebP | ImageKind::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(writer, kind.codec())
        }
    };
    result.map_err(|e| PrepareError::Encode(e.to_string()))
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResizeStrategy;
    use image::{Rgb, RgbImage};

    fn noise(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ x.wrapping_mul(y);
            Rgb([(v % 251) as u8, (v / 7 % 241) as u8, (v / 13 % 239) as u8])
        })
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    // ── Validation ──

    #[test]
    fn missing_file_is_not_found() {
        let err = prepare(Path::new("/no/such/photo.jpg"), &PrepareOptions::default()).unwrap_err();
        assert!(matches!(err, PrepareError::FileNotFound(_)));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.bmp");
        gradient(8, 8).save(&path).unwrap();

        let err = prepare(&path, &PrepareOptions::default()).unwrap_err();
        assert!(matches!(err, PrepareError::UnsupportedFormat(ext) if ext == "bmp"));
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = prepare(&path, &PrepareOptions::default()).unwrap_err();
        assert!(matches!(err, PrepareError::CorruptImage(_)));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let options = PrepareOptions::default().max_bytes(0);
        let err = prepare(Path::new("x.png"), &options).unwrap_err();
        assert!(matches!(err, PrepareError::InvalidOptions(_)));
    }

    #[test]
    fn inspect_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        gradient(320, 200).save(&path).unwrap();

        let asset = inspect(&path).unwrap();
        assert_eq!((asset.width, asset.height), (320, 200));
        assert_eq!(asset.kind, ImageKind::Png);
        assert_eq!(asset.byte_size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(asset.file_name(), "shot.png");
    }

    // ── Identity ──

    #[test]
    fn compliant_jpeg_passes_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        gradient(1600, 1200).save(&path).unwrap();
        let original = std::fs::read(&path).unwrap();

        let payload = prepare(&path, &PrepareOptions::default()).unwrap();

        assert_eq!(payload.resize_passes, 0);
        assert_eq!(payload.outcome, ShrinkOutcome::Untouched);
        assert_eq!(payload.mime_type, "image/jpeg");
        assert_eq!((payload.width, payload.height), (1600, 1200));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&payload.data)
            .unwrap();
        assert_eq!(decoded, original);
    }

    // ── Pixel ceiling ──

    #[test]
    fn oversized_jpeg_is_downscaled_within_edge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.jpg");
        gradient(4000, 3000).save(&path).unwrap();

        let options = PrepareOptions::default().temp_dir(dir.path().join("scratch"));
        std::fs::create_dir(dir.path().join("scratch")).unwrap();
        let payload = prepare(&path, &options).unwrap();

        assert!(payload.width <= 2048 && payload.height <= 2048);
        assert_eq!((payload.width, payload.height), (2048, 1536));
        assert!(payload.resize_passes >= 1);
        assert_eq!(payload.outcome, ShrinkOutcome::Fits);
        assert_eq!((payload.source.width, payload.source.height), (4000, 3000));
        assert_eq!(scratch_entries(&dir.path().join("scratch")), 0);
    }

    #[test]
    fn downscale_preserves_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tall.png");
        gradient(300, 900).save(&path).unwrap();

        let options = PrepareOptions::default().max_pixel_edge(100);
        let payload = prepare(&path, &options).unwrap();

        assert_eq!(payload.height, 100);
        let ratio = payload.width as f64 / payload.height as f64;
        assert!((ratio - 300.0 / 900.0).abs() < 0.02, "ratio was {ratio}");
    }

    // ── Byte ceiling ──

    #[test]
    fn oversized_bytes_shrink_until_they_fit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.png");
        noise(512, 512).save(&path).unwrap();
        let original = std::fs::metadata(&path).unwrap().len();

        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let options = PrepareOptions::default()
            .max_bytes(original / 3)
            .strategy(ResizeStrategy::Halve)
            .temp_dir(&scratch);
        let payload = prepare(&path, &options).unwrap();

        assert_eq!(payload.outcome, ShrinkOutcome::Fits);
        assert!(payload.byte_size <= original / 3);
        assert!(payload.resize_passes >= 1);
        assert!(payload.width < 512);
        assert_eq!(scratch_entries(&scratch), 0);
    }

    #[test]
    fn unshrinkable_payload_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.png");
        noise(64, 64).save(&path).unwrap();

        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let options = PrepareOptions::default()
            .max_bytes(16)
            .max_retries(3)
            .strategy(ResizeStrategy::Halve)
            .temp_dir(&scratch);

        let err = prepare(&path, &options).unwrap_err();
        match err {
            PrepareError::PayloadTooLarge { limit, passes, .. } => {
                assert_eq!(limit, 16);
                assert_eq!(passes, 3);
            }
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
        assert_eq!(scratch_entries(&scratch), 0);
    }
}
