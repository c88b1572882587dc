//! Result reconciliation
//!
//! Inserts a decoded result into the host editor, either as a new layer on
//! the source document or as a new standalone document.

use crate::editor::{DocumentId, Editor, LayerId};
use crate::error::{RemovalError, Result};
use crate::settings::OutputMode;
use image::imageops::{self, FilterType};
use image::DynamicImage;

/// Longest layer name given to a result layer, in characters
pub const MAX_LAYER_NAME_CHARS: usize = 64;

/// Name used when the source layer has none
pub const DEFAULT_LAYER_NAME: &str = "Background Removed";

const ELLIPSIS: &str = "...";

/// Where a result is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    NewLayerInCurrentImage,
    NewStandaloneImage,
}

impl From<OutputMode> for OutputTarget {
    fn from(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Layer => Self::NewLayerInCurrentImage,
            OutputMode::File => Self::NewStandaloneImage,
        }
    }
}

/// What reconciliation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciledOutput {
    pub document: DocumentId,
    pub layer: LayerId,
    pub target: OutputTarget,
}

/// Layer name for a result derived from `source_name`
#[must_use]
pub fn result_layer_name(source_name: &str) -> String {
    if source_name.trim().is_empty() {
        DEFAULT_LAYER_NAME.to_string()
    } else {
        format!("{} - {}", source_name, DEFAULT_LAYER_NAME)
    }
}

/// Cap a layer name at [`MAX_LAYER_NAME_CHARS`], ending with `...` when cut
#[must_use]
pub fn truncate_layer_name(name: &str) -> String {
    if name.is_empty() {
        return DEFAULT_LAYER_NAME.to_string();
    }
    if name.chars().count() <= MAX_LAYER_NAME_CHARS {
        return name.to_string();
    }

    let keep = MAX_LAYER_NAME_CHARS - ELLIPSIS.len();
    let mut truncated: String = name.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Insert `raster` into the editor according to `target`
///
/// `target_document` is the source document and is required for
/// [`OutputTarget::NewLayerInCurrentImage`].
///
/// # Errors
/// - Layer mode without a target document
/// - The editor rejected document creation or layer insertion
pub fn reconcile(
    editor: &mut dyn Editor,
    raster: &DynamicImage,
    target: OutputTarget,
    target_document: Option<DocumentId>,
    layer_name: &str,
) -> Result<ReconciledOutput> {
    if !raster.color().has_alpha() {
        tracing::debug!(color = ?raster.color(), "Result has no alpha channel, adding one");
    }

    let output = match target {
        OutputTarget::NewStandaloneImage => new_standalone_image(editor, raster, layer_name),
        OutputTarget::NewLayerInCurrentImage => {
            new_layer_in_document(editor, raster, target_document, layer_name)
        },
    }?;

    editor.flush_displays();
    tracing::info!(document = %output.document, layer = %output.layer, target = ?target, "Result inserted");
    Ok(output)
}

fn new_standalone_image(
    editor: &mut dyn Editor,
    raster: &DynamicImage,
    layer_name: &str,
) -> Result<ReconciledOutput> {
    let failed = |e: RemovalError| {
        tracing::warn!(error = %e, "Failed to create standalone image");
        RemovalError::reconciliation("Failed to create new image file")
    };

    let pixels = raster.to_rgba8();
    let document = editor
        .create_document(pixels.width(), pixels.height())
        .map_err(failed)?;
    let layer = editor
        .insert_layer(document, &truncate_layer_name(layer_name), pixels, 0)
        .map_err(failed)?;
    editor.open_display(document).map_err(failed)?;

    Ok(ReconciledOutput {
        document,
        layer,
        target: OutputTarget::NewStandaloneImage,
    })
}

fn new_layer_in_document(
    editor: &mut dyn Editor,
    raster: &DynamicImage,
    target_document: Option<DocumentId>,
    layer_name: &str,
) -> Result<ReconciledOutput> {
    let failed = |e: RemovalError| {
        tracing::warn!(error = %e, "Failed to insert result layer");
        RemovalError::reconciliation("Failed to create new layer")
    };

    let document = target_document
        .ok_or_else(|| RemovalError::reconciliation("Failed to create new layer"))?;
    let (canvas_width, canvas_height) = editor
        .canvas_size(document)
        .ok_or_else(|| RemovalError::reconciliation("Failed to create new layer"))?;

    let mut pixels = raster.to_rgba8();
    if pixels.dimensions() != (canvas_width, canvas_height) {
        tracing::debug!(
            from_width = pixels.width(),
            from_height = pixels.height(),
            to_width = canvas_width,
            to_height = canvas_height,
            "Resampling result to canvas size"
        );
        pixels = imageops::resize(&pixels, canvas_width, canvas_height, FilterType::Triangle);
    }

    let layer = editor
        .insert_layer(document, &truncate_layer_name(layer_name), pixels, 0)
        .map_err(failed)?;
    editor.select_layer(document, layer).map_err(failed)?;

    Ok(ReconciledOutput {
        document,
        layer,
        target: OutputTarget::NewLayerInCurrentImage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MemoryEditor;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn source_document(editor: &mut MemoryEditor, width: u32, height: u32) -> DocumentId {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([0, 0, 0, 255]),
        ));
        editor.open_image("Background", &image).unwrap().0
    }

    #[test]
    fn test_layer_mode_resamples_to_canvas() {
        let mut editor = MemoryEditor::new();
        let doc = source_document(&mut editor, 200, 200);
        let raster = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([255, 0, 0, 255])));

        let output = reconcile(
            &mut editor,
            &raster,
            OutputTarget::NewLayerInCurrentImage,
            Some(doc),
            "Background - Background Removed",
        )
        .unwrap();

        let document = editor.document(doc).unwrap();
        let top = document.top_layer().unwrap();
        assert_eq!(top.id, output.layer);
        assert_eq!(top.pixels.dimensions(), (200, 200));
        assert_eq!(top.name, "Background - Background Removed");
        assert_eq!(document.selected, Some(output.layer));
        assert_eq!(document.layers.len(), 2);
        assert_eq!(editor.flush_count(), 1);
    }

    #[test]
    fn test_layer_mode_truncates_long_names() {
        let mut editor = MemoryEditor::new();
        let doc = source_document(&mut editor, 8, 8);
        let raster = DynamicImage::ImageRgba8(RgbaImage::new(8, 8));
        let long_name = result_layer_name(&"Layer".repeat(20));

        let output = reconcile(
            &mut editor,
            &raster,
            OutputTarget::NewLayerInCurrentImage,
            Some(doc),
            &long_name,
        )
        .unwrap();

        let top = editor.document(doc).unwrap().top_layer().unwrap();
        assert_eq!(top.id, output.layer);
        assert_eq!(top.name.chars().count(), MAX_LAYER_NAME_CHARS);
        assert_eq!(top.name, truncate_layer_name(&long_name));
        assert!(top.name.ends_with("..."));
    }

    #[test]
    fn test_layer_mode_without_document_fails() {
        let mut editor = MemoryEditor::new();
        let raster = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let err = reconcile(
            &mut editor,
            &raster,
            OutputTarget::NewLayerInCurrentImage,
            None,
            "x",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Failed to create new layer");
    }

    #[test]
    fn test_standalone_image_adds_opaque_alpha() {
        let mut editor = MemoryEditor::new();
        let raster = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 5, Rgb([10, 20, 30])));

        let output = reconcile(
            &mut editor,
            &raster,
            OutputTarget::NewStandaloneImage,
            None,
            "Photo - Background Removed",
        )
        .unwrap();

        let document = editor.document(output.document).unwrap();
        assert_eq!((document.width, document.height), (3, 5));
        assert_eq!(document.layers.len(), 1);
        assert!(document.displayed);
        assert_eq!(
            document.layers[0].pixels.get_pixel(1, 1),
            &Rgba([10, 20, 30, 255])
        );
    }

    #[test]
    fn test_truncate_layer_name() {
        assert_eq!(truncate_layer_name("short"), "short");
        assert_eq!(truncate_layer_name(""), "Background Removed");

        let exact = "a".repeat(64);
        assert_eq!(truncate_layer_name(&exact), exact);

        let long = "b".repeat(100);
        let truncated = truncate_layer_name(&long);
        assert_eq!(truncated.chars().count(), 64);
        assert!(truncated.ends_with("..."));

        let wide = "é".repeat(70);
        assert_eq!(truncate_layer_name(&wide).chars().count(), 64);
    }

    #[test]
    fn test_result_layer_name() {
        assert_eq!(result_layer_name("Sky"), "Sky - Background Removed");
        assert_eq!(result_layer_name(""), "Background Removed");
    }

    #[test]
    fn test_output_target_from_mode() {
        assert_eq!(
            OutputTarget::from(OutputMode::Layer),
            OutputTarget::NewLayerInCurrentImage
        );
        assert_eq!(
            OutputTarget::from(OutputMode::File),
            OutputTarget::NewStandaloneImage
        );
    }
}
