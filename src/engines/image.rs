use super::{run_blocking, Artifact, ConvertEngine, ConvertOptions, EngineType, PDF_CONTENT_TYPE};
use crate::error::{AppError, Result};
use crate::pdf::PdfWriter;
use crate::registry::Operation;
use crate::staging::StagedFile;
use async_trait::async_trait;
use image::{DynamicImage, ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Image codec backend: decodes uploads with the `image` crate and writes
/// one PDF page per image, in upload order.
pub struct ImageEngine;

impl ImageEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop any alpha channel by compositing over white, and normalize palette,
/// grayscale and 16-bit images to 8-bit RGB. PDF image XObjects here carry no
/// soft mask, so transparency has to be resolved before encoding.
pub fn flatten_to_rgb(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }

    let rgba = image.into_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    out
}

fn decode(path: &Path) -> std::result::Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

fn images_to_pdf(inputs: Vec<(PathBuf, String)>, output_path: &Path) -> Result<()> {
    let mut writer = PdfWriter::new();

    for (path, name) in inputs {
        let decoded = decode(&path).map_err(|e| {
            AppError::conversion(EngineType::Image, format!("cannot decode {}: {}", name, e))
        })?;
        debug!(
            "Decoded {} ({}x{}, {:?})",
            name,
            decoded.width(),
            decoded.height(),
            decoded.color()
        );

        let rgb = flatten_to_rgb(decoded);
        writer
            .add_image_page(rgb)
            .map_err(|e| AppError::conversion(EngineType::Image, e))?;
    }

    writer
        .save(output_path)
        .map_err(|e| AppError::conversion(EngineType::Image, e))
}

#[async_trait]
impl ConvertEngine for ImageEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Image
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        operation: Operation,
        inputs: &[StagedFile],
        output_dir: &Path,
        _options: &ConvertOptions,
    ) -> Result<Artifact> {
        let first = inputs.first().ok_or_else(|| {
            AppError::conversion(EngineType::Image, "no images to convert")
        })?;
        if operation == Operation::ImageToPdf && inputs.len() != 1 {
            return Err(AppError::conversion(
                EngineType::Image,
                format!("expected exactly one image, got {}", inputs.len()),
            ));
        }

        let filename = format!("{}.pdf", first.original_stem());
        let output_path = output_dir.join("images.pdf");

        info!("Converting {} image(s) to PDF", inputs.len());
        let jobs: Vec<(PathBuf, String)> = inputs
            .iter()
            .map(|f| (f.path.clone(), f.original_name.clone()))
            .collect();
        let target = output_path.clone();
        run_blocking(EngineType::Image, move || images_to_pdf(jobs, &target)).await?;

        Ok(Artifact {
            path: output_path,
            filename,
            content_type: PDF_CONTENT_TYPE,
        })
    }
}
