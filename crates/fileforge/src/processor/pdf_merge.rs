//! PDF merge processor.
//!
//! PDFs contribute all their pages in order; raster images (JPEG/PNG/WebP)
//! each become one page with the image scaled to fit and centered. Anything
//! else is skipped with a warning. A bad PDF or image is a hard failure
//! naming the offending file; zero resulting pages fails the whole job.

use std::path::Path;

use image::GenericImageView;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::error::ProcessError;
use crate::sanitize;

use super::{output_key, OutputFile, ProcessContext, ProcessResult, Processor};

// A4 in PDF points, rounded to whole points.
const A4_WIDTH: f64 = 595.0;
const A4_HEIGHT: f64 = 842.0;

const DEFAULT_OUTPUT_NAME: &str = "merged.pdf";

pub struct PdfMergeProcessor;

impl Processor for PdfMergeProcessor {
    fn slug(&self) -> &'static str {
        "pdf-merge"
    }

    fn process(&self, ctx: &ProcessContext) -> Result<ProcessResult, ProcessError> {
        let _span = tracing::info_span!("processor.pdf_merge", job_id = %ctx.job_id).entered();

        let original_page_size = ctx.param_str("pageSize") == Some("original");

        let mut merged = Document::with_version("1.5");
        let pages_root_id = merged.new_object_id();
        let mut page_ids: Vec<ObjectId> = Vec::new();
        let mut warnings = Vec::new();

        for path in &ctx.input_files {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();

            match extension.as_str() {
                "pdf" => {
                    append_pdf_pages(&mut merged, pages_root_id, path, &mut page_ids)?;
                }
                "jpg" | "jpeg" | "png" | "webp" => {
                    let page_id =
                        add_image_page(&mut merged, pages_root_id, path, original_page_size)?;
                    page_ids.push(page_id);
                }
                other => {
                    let warning = format!(
                        "Unsupported file type '{}', skipped: {}",
                        other,
                        sanitize::redact_path(path)
                    );
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        if page_ids.is_empty() {
            return Err(ProcessError::NoValidInput);
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        merged.objects.insert(
            pages_root_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_ids.len() as i64,
            }),
        );

        let catalog_id = merged.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_root_id,
        });
        merged.trailer.set("Root", catalog_id);
        merged.compress();

        let filename = sanitize::safe_filename(
            ctx.param_str("outputName").unwrap_or(DEFAULT_OUTPUT_NAME),
        );
        let output_path = ctx.working_dir.join(&filename);
        merged
            .save(&output_path)
            .map_err(|e| ProcessError::PdfProcessing(format!("failed to save merged PDF: {}", e)))?;

        Ok(ProcessResult {
            outputs: vec![OutputFile {
                storage_key: output_key(&ctx.job_id, &filename),
                filename,
                mime_type: "application/pdf".to_string(),
            }],
            warnings,
        })
    }
}

fn is_catalog_or_pages(object: &Object) -> bool {
    if let Object::Dictionary(dict) = object {
        if let Ok(Object::Name(name)) = dict.get(b"Type") {
            return name.as_slice() == b"Catalog" || name.as_slice() == b"Pages";
        }
    }
    false
}

/// Page attributes a page may inherit from its Pages ancestors. We flatten
/// them onto each page before discarding the source page tree.
fn inherited_attrs(src: &Document, page_id: ObjectId) -> Vec<(&'static str, Object)> {
    const KEYS: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

    let Ok(page_dict) = src.get_object(page_id).and_then(|o| o.as_dict()) else {
        return Vec::new();
    };

    let mut missing: Vec<&'static str> = KEYS
        .iter()
        .filter(|key| !page_dict.has(key.as_bytes()))
        .copied()
        .collect();

    let mut found = Vec::new();
    let mut current = page_dict.get(b"Parent").and_then(|o| o.as_reference()).ok();
    let mut depth = 0;

    while let Some(parent_id) = current {
        depth += 1;
        if depth > 32 || missing.is_empty() {
            break;
        }
        let Ok(dict) = src.get_object(parent_id).and_then(|o| o.as_dict()) else {
            break;
        };
        missing.retain(|key| {
            if let Ok(value) = dict.get(key.as_bytes()) {
                found.push((*key, value.clone()));
                false
            } else {
                true
            }
        });
        current = dict.get(b"Parent").and_then(|o| o.as_reference()).ok();
    }

    found
}

/// Copies all pages of the PDF at `path` into `merged`, in order.
///
/// The source document's objects are renumbered past `merged.max_id`, its
/// catalog and page-tree nodes are dropped, and each page is re-parented
/// under `parent` with formerly inherited attributes made explicit.
fn append_pdf_pages(
    merged: &mut Document,
    parent: ObjectId,
    path: &Path,
    page_ids: &mut Vec<ObjectId>,
) -> Result<(), ProcessError> {
    let filename = sanitize::redact_path(path);

    let mut src = Document::load(path).map_err(|e| ProcessError::FileFailed {
        filename: filename.clone(),
        reason: format!("failed to load PDF: {}", e),
    })?;

    src.renumber_objects_with(merged.max_id + 1);
    merged.max_id = src.max_id;

    let src_pages: Vec<ObjectId> = src.get_pages().into_values().collect();
    if src_pages.is_empty() {
        return Err(ProcessError::FileFailed {
            filename,
            reason: "PDF contains no pages".to_string(),
        });
    }

    let attrs: Vec<(ObjectId, Vec<(&'static str, Object)>)> = src_pages
        .iter()
        .map(|&id| (id, inherited_attrs(&src, id)))
        .collect();

    for (id, object) in std::mem::take(&mut src.objects) {
        if !is_catalog_or_pages(&object) {
            merged.objects.insert(id, object);
        }
    }

    for (id, inherited) in attrs {
        if let Ok(Object::Dictionary(dict)) = merged.get_object_mut(id) {
            dict.set("Parent", parent);
            for (key, value) in inherited {
                if !dict.has(key.as_bytes()) {
                    dict.set(key, value);
                }
            }
            page_ids.push(id);
        }
    }

    Ok(())
}

/// Creates one page holding the raster image at `path`, scaled preserving
/// aspect ratio and centered. JPEG data is embedded directly (DCTDecode);
/// everything else is decoded and embedded as raw RGB.
fn add_image_page(
    doc: &mut Document,
    parent: ObjectId,
    path: &Path,
    original_page_size: bool,
) -> Result<ObjectId, ProcessError> {
    let filename = sanitize::redact_path(path);

    let data = std::fs::read(path).map_err(|e| ProcessError::ReadInput {
        path: path.to_path_buf(),
        source: e,
    })?;

    let img = image::load_from_memory(&data).map_err(|e| ProcessError::FileFailed {
        filename: filename.clone(),
        reason: format!("failed to decode image: {}", e),
    })?;
    let (width, height) = img.dimensions();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let image_stream = if extension == "jpg" || extension == "jpeg" {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data,
        )
    } else {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            img.to_rgb8().into_raw(),
        )
    };
    let image_id = doc.add_object(Object::Stream(image_stream));

    let (page_width, page_height) = if original_page_size {
        (width as f64, height as f64)
    } else {
        (A4_WIDTH, A4_HEIGHT)
    };

    let ratio = (page_width / width as f64).min(page_height / height as f64);
    let scaled_width = width as f64 * ratio;
    let scaled_height = height as f64 * ratio;
    let x = (page_width - scaled_width) / 2.0;
    let y = (page_height - scaled_height) / 2.0;

    let content = format!(
        "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/Im1 Do\nQ\n",
        scaled_width, scaled_height, x, y
    );
    let content_id = doc.add_object(Object::Stream(Stream::new(
        dictionary! {},
        content.into_bytes(),
    )));

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            "Im1" => image_id,
        },
    });

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            (page_width as i64).into(),
            (page_height as i64).into(),
        ],
        "Resources" => resources_id,
        "Contents" => content_id,
    });

    Ok(page_id)
}
