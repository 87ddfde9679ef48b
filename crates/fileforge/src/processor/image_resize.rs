//! Image resize processor.
//!
//! Every input image yields one output image, resized to the requested
//! dimensions and optionally re-encoded into a different format. With
//! `lockAspectRatio` (the default) the image is fit within the requested
//! box; a single given dimension leaves the other unconstrained.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::ProcessError;
use crate::sanitize;

use super::{output_key, OutputFile, ProcessContext, ProcessResult, Processor};

const JPEG_QUALITY: u8 = 85;

pub struct ImageResizeProcessor;

impl Processor for ImageResizeProcessor {
    fn slug(&self) -> &'static str {
        "image-resize"
    }

    fn process(&self, ctx: &ProcessContext) -> Result<ProcessResult, ProcessError> {
        let _span = tracing::info_span!("processor.image_resize", job_id = %ctx.job_id).entered();

        let width = ctx.param_u32("width");
        let height = ctx.param_u32("height");
        let lock_aspect_ratio = ctx.param_bool("lockAspectRatio").unwrap_or(true);

        let mut outputs = Vec::new();
        let mut warnings = Vec::new();

        for path in &ctx.input_files {
            let filename = sanitize::redact_path(path);

            let Ok(source_format) = ImageFormat::from_path(path) else {
                let warning = format!("Not a supported image, skipped: {}", filename);
                tracing::warn!("{}", warning);
                warnings.push(warning);
                continue;
            };

            let img = image::open(path).map_err(|e| ProcessError::FileFailed {
                filename: filename.clone(),
                reason: format!("failed to decode image: {}", e),
            })?;

            let resized = resize_image(&img, width, height, lock_aspect_ratio);

            let target_format = target_format(ctx.param_str("format"), source_format);
            let output_name = output_name(path, target_format);
            let output_path = ctx.working_dir.join(&output_name);

            write_image(&resized, target_format, &output_path).map_err(|e| {
                ProcessError::ImageProcessing(format!("failed to encode {}: {}", output_name, e))
            })?;

            tracing::debug!(
                input = %filename,
                output = %output_name,
                width = resized.width(),
                height = resized.height(),
                "resized image"
            );

            outputs.push(OutputFile {
                storage_key: output_key(&ctx.job_id, &output_name),
                mime_type: mime_guess::from_path(&output_path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string(),
                filename: output_name,
            });
        }

        if outputs.is_empty() {
            return Err(ProcessError::NoValidInput);
        }

        Ok(ProcessResult { outputs, warnings })
    }
}

fn resize_image(
    img: &DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    lock_aspect_ratio: bool,
) -> DynamicImage {
    match (width, height) {
        // No dimensions requested: pure format conversion.
        (None, None) => img.clone(),
        (w, h) if lock_aspect_ratio => {
            // A missing dimension is unbounded; the given one decides.
            img.resize(
                w.unwrap_or(u32::MAX),
                h.unwrap_or(u32::MAX),
                FilterType::Lanczos3,
            )
        }
        (w, h) => img.resize_exact(
            w.unwrap_or(img.width()),
            h.unwrap_or(img.height()),
            FilterType::Lanczos3,
        ),
    }
}

fn target_format(requested: Option<&str>, source: ImageFormat) -> ImageFormat {
    match requested {
        Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
        Some("png") => ImageFormat::Png,
        Some("webp") => ImageFormat::WebP,
        _ => source,
    }
}

fn output_name(input: &Path, format: ImageFormat) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    sanitize::safe_filename(&format!("{}-resized.{}", stem, extension))
}

fn write_image(img: &DynamicImage, format: ImageFormat, path: &Path) -> image::ImageResult<()> {
    match format {
        // JPEG has no alpha and we want an explicit quality setting.
        ImageFormat::Jpeg => {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        // The crate only encodes lossless WebP.
        ImageFormat::WebP => {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            let encoder = WebPEncoder::new_lossless(&mut writer);
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
        }
        other => img.save_with_format(path, other),
    }
}
