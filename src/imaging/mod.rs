//! Upload optimisation: decode, bound to a maximum dimension, pick an output
//! codec and write the result under the public upload directory.

use std::path::{Path, PathBuf};

use image::{
    DynamicImage, ImageError, ImageFormat, Rgb, RgbImage,
    codecs::jpeg::JpegEncoder,
    codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    codecs::webp::WebPEncoder,
    imageops::FilterType,
};
use thiserror::Error;
use tracing::debug;

/// MIME types accepted from the upload form.
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Public URL prefix under which stored images are recorded.
pub const PUBLIC_PREFIX: &str = "/assets/img/timbres";

const JPEG_QUALITY: u8 = 88;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("empty upload")]
    Empty,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageOptions {
    pub max_dimension: u32,
    /// Whether WebP sources may be written back as WebP.
    pub webp_output: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_dimension: 1200,
            webp_output: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct OptimizedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct SavedImage {
    /// Path recorded in the database, relative to the public directory root.
    pub public_path: String,
    pub disk_path: PathBuf,
    pub original_size: u64,
    pub stored_size: u64,
}

pub fn source_format(mime: &str) -> Option<ImageFormat> {
    match mime {
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/png" => Some(ImageFormat::Png),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Scales `(width, height)` so the longer side fits in `max`, keeping the aspect
/// ratio. Never enlarges.
pub fn target_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let ratio = (max as f64 / width as f64)
        .min(max as f64 / height as f64)
        .min(1.0);
    let scaled = |side: u32| ((side as f64 * ratio).floor() as u32).max(1);
    (scaled(width), scaled(height))
}

/// True when at least one pixel is not fully opaque.
pub fn has_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    match img.as_rgba8() {
        Some(rgba) => rgba.pixels().any(|p| p.0[3] < u8::MAX),
        None => img.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX),
    }
}

pub fn choose_output_format(
    source: ImageFormat,
    transparent: bool,
    options: &ImageOptions,
) -> OutputFormat {
    match source {
        ImageFormat::Png if transparent => OutputFormat::Png,
        ImageFormat::WebP if options.webp_output => OutputFormat::WebP,
        _ => OutputFormat::Jpeg,
    }
}

pub fn optimize(
    bytes: &[u8],
    mime: &str,
    options: &ImageOptions,
) -> Result<OptimizedImage, ImagingError> {
    let format =
        source_format(mime).ok_or_else(|| ImagingError::UnsupportedType(mime.to_string()))?;
    let source = image::load_from_memory_with_format(bytes, format)?;

    let transparent = format == ImageFormat::Png && has_transparency(&source);
    let output = choose_output_format(format, transparent, options);

    let (width, height) =
        target_dimensions(source.width(), source.height(), options.max_dimension);
    let resized = if (width, height) == (source.width(), source.height()) {
        source
    } else {
        source.resize_exact(width, height, FilterType::Lanczos3)
    };

    let bytes = encode(&resized, output)?;
    debug!(
        width,
        height,
        format = output.extension(),
        "optimized uploaded image"
    );

    Ok(OptimizedImage {
        bytes,
        format: output,
        width,
        height,
    })
}

fn encode(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(flatten_on_white(img));
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))?;
        }
        OutputFormat::Png => {
            // CompressionType::Default is zlib level 6.
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Default,
                PngFilterType::Adaptive,
            ))?;
        }
        OutputFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?;
        }
    }
    Ok(buf)
}

/// JPEG has no alpha channel; composite onto a white background.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

pub fn file_name(stamp_id: i64, timestamp_millis: i64, number: usize, format: OutputFormat) -> String {
    format!(
        "timbre_{}_{}_{}.{}",
        stamp_id,
        timestamp_millis,
        number,
        format.extension()
    )
}

/// Optimises one upload on the blocking pool and writes it to `upload_dir`.
pub async fn save_upload(
    upload_dir: &Path,
    stamp_id: i64,
    number: usize,
    file: UploadedFile,
    options: ImageOptions,
) -> Result<SavedImage, ImagingError> {
    if file.bytes.is_empty() {
        return Err(ImagingError::Empty);
    }
    if !ALLOWED_MIME_TYPES.contains(&file.content_type.as_str()) {
        return Err(ImagingError::UnsupportedType(file.content_type));
    }

    let original_size = file.bytes.len() as u64;
    let optimized = tokio::task::spawn_blocking(move || {
        optimize(&file.bytes, &file.content_type, &options)
    })
    .await??;

    tokio::fs::create_dir_all(upload_dir).await?;
    let name = file_name(
        stamp_id,
        chrono::Utc::now().timestamp_millis(),
        number,
        optimized.format,
    );
    let disk_path = upload_dir.join(&name);
    tokio::fs::write(&disk_path, &optimized.bytes).await?;

    Ok(SavedImage {
        public_path: format!("{}/{}", PUBLIC_PREFIX, name),
        disk_path,
        original_size,
        stored_size: optimized.bytes.len() as u64,
    })
}

/// Maps a recorded public path back onto the filesystem.
pub fn disk_path(public_dir: &Path, public_path: &str) -> PathBuf {
    public_dir.join(public_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: RgbaImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn dimensions_fit_the_longer_side() {
        assert_eq!(target_dimensions(2400, 1200, 1200), (1200, 600));
        assert_eq!(target_dimensions(1000, 3000, 1200), (400, 1200));
    }

    #[test]
    fn dimensions_never_upscale() {
        assert_eq!(target_dimensions(800, 600, 1200), (800, 600));
        assert_eq!(target_dimensions(1200, 1200, 1200), (1200, 1200));
    }

    #[test]
    fn dimensions_keep_at_least_one_pixel() {
        assert_eq!(target_dimensions(10_000, 1, 1200), (1200, 1));
    }

    #[test]
    fn opaque_png_becomes_jpeg() {
        let img = RgbaImage::from_pixel(40, 30, Rgba([10, 120, 200, 255]));
        let out = optimize(&png_bytes(img), "image/png", &ImageOptions::default()).unwrap();

        assert_eq!(out.format, OutputFormat::Jpeg);
        assert_eq!(
            image::guess_format(&out.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn single_translucent_pixel_keeps_png() {
        let mut img = RgbaImage::from_pixel(300, 300, Rgba([10, 120, 200, 255]));
        img.put_pixel(151, 77, Rgba([10, 120, 200, 254]));
        let out = optimize(&png_bytes(img), "image/png", &ImageOptions::default()).unwrap();

        assert_eq!(out.format, OutputFormat::Png);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn large_images_are_downscaled() {
        let options = ImageOptions {
            max_dimension: 50,
            webp_output: true,
        };
        let out = optimize(&jpeg_bytes(200, 100), "image/jpeg", &options).unwrap();

        assert_eq!((out.width, out.height), (50, 25));
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn webp_falls_back_to_jpeg_when_disabled() {
        let enabled = ImageOptions::default();
        let disabled = ImageOptions {
            webp_output: false,
            ..ImageOptions::default()
        };
        assert_eq!(
            choose_output_format(ImageFormat::WebP, false, &enabled),
            OutputFormat::WebP
        );
        assert_eq!(
            choose_output_format(ImageFormat::WebP, false, &disabled),
            OutputFormat::Jpeg
        );
        assert_eq!(
            choose_output_format(ImageFormat::Jpeg, false, &enabled),
            OutputFormat::Jpeg
        );
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let err = optimize(b"GIF89a", "image/gif", &ImageOptions::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedType(_)));
    }

    #[test]
    fn mislabelled_bytes_fail_to_decode() {
        let err = optimize(&jpeg_bytes(4, 4), "image/png", &ImageOptions::default()).unwrap_err();
        assert!(matches!(err, ImagingError::Image(_)));
    }

    #[test]
    fn transparent_pixels_flatten_to_white() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        let flat = flatten_on_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn public_paths_map_into_the_public_dir() {
        assert_eq!(
            disk_path(Path::new("/srv/public"), "/assets/img/timbres/a.jpg"),
            PathBuf::from("/srv/public/assets/img/timbres/a.jpg")
        );
        assert_eq!(
            file_name(4, 1700000000000, 2, OutputFormat::Png),
            "timbre_4_1700000000000_2.png"
        );
    }

    #[tokio::test]
    async fn save_upload_writes_into_the_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadedFile {
            file_name: "stamp.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: jpeg_bytes(20, 20),
        };

        let saved = save_upload(dir.path(), 3, 1, file, ImageOptions::default())
            .await
            .unwrap();

        assert!(saved.public_path.starts_with("/assets/img/timbres/timbre_3_"));
        assert!(saved.public_path.ends_with("_1.jpg"));
        assert!(saved.disk_path.exists());
        assert_eq!(
            std::fs::metadata(&saved.disk_path).unwrap().len(),
            saved.stored_size
        );
    }

    #[tokio::test]
    async fn empty_uploads_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = UploadedFile {
            file_name: "empty.png".into(),
            content_type: "image/png".into(),
            bytes: Vec::new(),
        };
        let err = save_upload(dir.path(), 1, 1, file, ImageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImagingError::Empty));
    }
}
