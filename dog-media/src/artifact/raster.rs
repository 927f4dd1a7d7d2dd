use std::path::Path;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use tracing::debug;

use super::{bounding_box, Dimensions, PreviewEncoder};
use crate::config::{PreviewRules, RasterFormat};
use crate::ArtifactError;

/// Resizes still images into the preview bounding box
#[derive(Debug, Clone)]
pub struct ImagePreviewEncoder {
    bounding_box: u32,
    format: RasterFormat,
}

impl ImagePreviewEncoder {
    pub fn new(rules: &PreviewRules) -> Self {
        Self {
            bounding_box: rules.bounding_box,
            format: rules.image_format,
        }
    }
}

#[async_trait]
impl PreviewEncoder for ImagePreviewEncoder {
    fn extension(&self) -> &'static str {
        self.format.extension()
    }

    async fn encode(&self, source: &Path, target: &Path) -> Result<Dimensions, ArtifactError> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        let longest = self.bounding_box;
        let format = self.format;

        // decoding and resampling are CPU bound
        tokio::task::spawn_blocking(move || resize(&source, &target, longest, format))
            .await
            .map_err(|e| ArtifactError::retryable(format!("image task failed: {}", e)))?
    }
}

fn resize(
    source: &Path,
    target: &Path,
    longest: u32,
    format: RasterFormat,
) -> Result<Dimensions, ArtifactError> {
    let img = image::open(source).map_err(classify)?;
    let dims = bounding_box(img.width(), img.height(), longest)
        .ok_or_else(|| ArtifactError::permanent("image has no pixels"))?;
    debug!(
        from_width = img.width(),
        from_height = img.height(),
        to_width = dims.width,
        to_height = dims.height,
        "Resizing image preview"
    );

    let resized = img.resize_exact(dims.width, dims.height, FilterType::Lanczos3);
    let (resized, image_format) = match format {
        RasterFormat::Png => (resized, ImageFormat::Png),
        // JPEG has no alpha channel
        RasterFormat::Jpeg => (DynamicImage::ImageRgb8(resized.to_rgb8()), ImageFormat::Jpeg),
    };
    resized.save_with_format(target, image_format).map_err(classify)?;
    Ok(dims)
}

fn classify(err: ImageError) -> ArtifactError {
    match err {
        ImageError::IoError(e) => e.into(),
        other => ArtifactError::permanent(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn landscape_image_fits_box() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        write_png(&source, 640, 480);
        let target = dir.path().join("photo.png.preview.png");

        let encoder = ImagePreviewEncoder::new(&PreviewRules::default());
        let dims = encoder.encode(&source, &target).await.unwrap();
        assert_eq!(dims, Dimensions::new(320, 240));

        let written = image::open(&target).unwrap();
        assert_eq!((written.width(), written.height()), (320, 240));
    }

    #[tokio::test]
    async fn portrait_image_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tall.png");
        write_png(&source, 100, 400);
        let target = dir.path().join("tall.jpg");

        let rules = PreviewRules {
            image_format: RasterFormat::Jpeg,
            ..PreviewRules::default()
        };
        let encoder = ImagePreviewEncoder::new(&rules);
        assert_eq!(encoder.extension(), "jpg");
        assert_eq!(encoder.encode(&source, &target).await.unwrap(), Dimensions::new(80, 320));
        assert_eq!(image::image_dimensions(&target).unwrap(), (80, 320));
    }

    #[tokio::test]
    async fn garbage_input_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        tokio::fs::write(&source, b"definitely not a png").await.unwrap();

        let encoder = ImagePreviewEncoder::new(&PreviewRules::default());
        let err = encoder.encode(&source, &dir.path().join("out.png")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
