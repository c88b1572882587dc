//! Host editor collaborator
//!
//! The pipeline only needs a handful of document operations from the host
//! editor: export a drawable, create a document, insert and select a layer.
//! [`Drawable`] and [`Editor`] describe those operations; [`MemoryEditor`]
//! is an in-memory document model used by the command-line host and tests.

use crate::error::{RemovalError, Result};
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Identifier of a document (image) in the host editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u32);

/// Identifier of a layer in the host editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub u32);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// An editable raster layer selected as the removal source
///
/// Exports run on the worker thread, so implementations must be shareable
/// across threads.
pub trait Drawable: Send + Sync {
    /// Layer name as shown in the host's layer list
    fn name(&self) -> &str;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Export the drawable's image, flattened, as PNG bytes
    ///
    /// # Errors
    /// - The host failed to duplicate, flatten or save the image
    fn export_png(&self) -> Result<Vec<u8>>;
}

/// Document operations the result reconciler needs from the host
pub trait Editor {
    /// Create an empty RGB document
    ///
    /// # Errors
    /// - Invalid dimensions or host failure
    fn create_document(&mut self, width: u32, height: u32) -> Result<DocumentId>;

    /// Canvas size of an open document
    fn canvas_size(&self, document: DocumentId) -> Option<(u32, u32)>;

    /// Insert a layer at `position` in the stack, 0 being the top
    ///
    /// # Errors
    /// - Unknown document or size mismatch
    fn insert_layer(
        &mut self,
        document: DocumentId,
        name: &str,
        pixels: RgbaImage,
        position: usize,
    ) -> Result<LayerId>;

    /// Make `layer` the selected layer of `document`
    ///
    /// # Errors
    /// - Unknown document or layer
    fn select_layer(&mut self, document: DocumentId, layer: LayerId) -> Result<()>;

    /// Open a display window for a new document
    ///
    /// # Errors
    /// - Host failure
    fn open_display(&mut self, _document: DocumentId) -> Result<()> {
        Ok(())
    }

    /// Flush pending display updates
    fn flush_displays(&mut self) {}
}

/// Encode pixels as PNG bytes
///
/// # Errors
/// - PNG encoding failure
pub fn encode_png(pixels: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(pixels.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| RemovalError::export(e.to_string()))?;
    Ok(bytes)
}

/// A layer in a [`MemoryEditor`] document
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub pixels: RgbaImage,
    /// Opacity in percent
    pub opacity: f32,
}

/// A document in a [`MemoryEditor`]
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub width: u32,
    pub height: u32,
    /// Layer stack, index 0 on top
    pub layers: Vec<Layer>,
    pub selected: Option<LayerId>,
    pub displayed: bool,
}

impl Document {
    /// Composite all layers bottom-up into one image
    #[must_use]
    pub fn flatten(&self) -> RgbaImage {
        let mut canvas = RgbaImage::new(self.width, self.height);
        for layer in self.layers.iter().rev() {
            if (layer.opacity - 100.0).abs() < f32::EPSILON {
                imageops::overlay(&mut canvas, &layer.pixels, 0, 0);
            } else {
                let mut faded = layer.pixels.clone();
                let factor = (layer.opacity / 100.0).clamp(0.0, 1.0);
                for pixel in faded.pixels_mut() {
                    pixel[3] = (f32::from(pixel[3]) * factor).round() as u8;
                }
                imageops::overlay(&mut canvas, &faded, 0, 0);
            }
        }
        canvas
    }

    #[must_use]
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    /// Topmost layer
    #[must_use]
    pub fn top_layer(&self) -> Option<&Layer> {
        self.layers.first()
    }
}

/// Snapshot of a layer taken on the interactive thread for export on the worker
#[derive(Debug, Clone)]
pub struct LayerSnapshot {
    name: String,
    width: u32,
    height: u32,
    composite: Arc<RgbaImage>,
}

impl LayerSnapshot {
    /// Build a snapshot from a layer and the flattened document it belongs to
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32, composite: RgbaImage) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            composite: Arc::new(composite),
        }
    }
}

impl Drawable for LayerSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn export_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.composite)
    }
}

/// In-memory host editor
#[derive(Debug, Default)]
pub struct MemoryEditor {
    documents: Vec<Document>,
    next_id: u32,
    flushes: usize,
}

impl MemoryEditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Open a decoded image as a new document with a single layer
    ///
    /// # Errors
    /// - Image has a zero dimension
    pub fn open_image(&mut self, name: &str, image: &DynamicImage) -> Result<(DocumentId, LayerId)> {
        let pixels = image.to_rgba8();
        let document = self.create_document(pixels.width(), pixels.height())?;
        let layer = self.insert_layer(document, name, pixels, 0)?;
        self.select_layer(document, layer)?;
        Ok((document, layer))
    }

    #[must_use]
    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    fn document_mut(&mut self, id: DocumentId) -> Result<&mut Document> {
        self.documents
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| RemovalError::reconciliation(format!("Unknown document {}", id)))
    }

    /// All open documents in creation order
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Number of display flushes requested so far
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Snapshot a layer for export, capturing the flattened document
    ///
    /// # Errors
    /// - Unknown document or layer
    pub fn drawable(&self, document: DocumentId, layer: LayerId) -> Result<Arc<dyn Drawable>> {
        let doc = self
            .document(document)
            .ok_or_else(|| RemovalError::export(format!("Unknown document {}", document)))?;
        let source = doc
            .layer(layer)
            .ok_or_else(|| RemovalError::export(format!("Unknown layer {}", layer)))?;

        Ok(Arc::new(LayerSnapshot::new(
            source.name.clone(),
            source.pixels.width(),
            source.pixels.height(),
            doc.flatten(),
        )))
    }
}

impl Editor for MemoryEditor {
    fn create_document(&mut self, width: u32, height: u32) -> Result<DocumentId> {
        if width == 0 || height == 0 {
            return Err(RemovalError::reconciliation(format!(
                "Invalid document size {}x{}",
                width, height
            )));
        }

        let id = DocumentId(self.allocate_id());
        self.documents.push(Document {
            id,
            width,
            height,
            layers: Vec::new(),
            selected: None,
            displayed: false,
        });
        Ok(id)
    }

    fn canvas_size(&self, document: DocumentId) -> Option<(u32, u32)> {
        self.document(document).map(|doc| (doc.width, doc.height))
    }

    fn insert_layer(
        &mut self,
        document: DocumentId,
        name: &str,
        pixels: RgbaImage,
        position: usize,
    ) -> Result<LayerId> {
        let id = LayerId(self.allocate_id());
        let doc = self.document_mut(document)?;

        if pixels.dimensions() != (doc.width, doc.height) {
            return Err(RemovalError::reconciliation(format!(
                "Layer size {}x{} does not match canvas {}x{}",
                pixels.width(),
                pixels.height(),
                doc.width,
                doc.height
            )));
        }

        let position = position.min(doc.layers.len());
        doc.layers.insert(
            position,
            Layer {
                id,
                name: name.to_string(),
                pixels,
                opacity: 100.0,
            },
        );
        Ok(id)
    }

    fn select_layer(&mut self, document: DocumentId, layer: LayerId) -> Result<()> {
        let doc = self.document_mut(document)?;
        if doc.layer(layer).is_none() {
            return Err(RemovalError::reconciliation(format!(
                "Unknown layer {} in {}",
                layer, document
            )));
        }
        doc.selected = Some(layer);
        Ok(())
    }

    fn open_display(&mut self, document: DocumentId) -> Result<()> {
        self.document_mut(document)?.displayed = true;
        Ok(())
    }

    fn flush_displays(&mut self) {
        self.flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn test_open_image_creates_single_layer_document() {
        let mut editor = MemoryEditor::new();
        let image = DynamicImage::ImageRgba8(solid(4, 3, [10, 20, 30, 255]));
        let (doc_id, layer_id) = editor.open_image("Background", &image).unwrap();

        let doc = editor.document(doc_id).unwrap();
        assert_eq!((doc.width, doc.height), (4, 3));
        assert_eq!(doc.layers.len(), 1);
        assert_eq!(doc.selected, Some(layer_id));
        assert_eq!(editor.canvas_size(doc_id), Some((4, 3)));
    }

    #[test]
    fn test_insert_layer_at_top() {
        let mut editor = MemoryEditor::new();
        let doc = editor.create_document(2, 2).unwrap();
        let bottom = editor
            .insert_layer(doc, "bottom", solid(2, 2, [0, 0, 0, 255]), 0)
            .unwrap();
        let top = editor
            .insert_layer(doc, "top", solid(2, 2, [255, 0, 0, 255]), 0)
            .unwrap();

        let document = editor.document(doc).unwrap();
        assert_eq!(document.layers[0].id, top);
        assert_eq!(document.layers[1].id, bottom);
        assert_eq!(document.flatten().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_insert_rejects_size_mismatch_and_unknown_document() {
        let mut editor = MemoryEditor::new();
        let doc = editor.create_document(2, 2).unwrap();
        assert!(editor
            .insert_layer(doc, "wrong", solid(3, 3, [0; 4]), 0)
            .is_err());
        assert!(editor
            .insert_layer(DocumentId(99), "lost", solid(2, 2, [0; 4]), 0)
            .is_err());
        assert!(editor.create_document(0, 5).is_err());
    }

    #[test]
    fn test_flatten_respects_transparency() {
        let mut editor = MemoryEditor::new();
        let doc = editor.create_document(1, 1).unwrap();
        editor
            .insert_layer(doc, "base", solid(1, 1, [0, 0, 255, 255]), 0)
            .unwrap();
        editor
            .insert_layer(doc, "clear", solid(1, 1, [255, 0, 0, 0]), 0)
            .unwrap();

        let flat = editor.document(doc).unwrap().flatten();
        assert_eq!(flat.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_drawable_exports_flattened_png() {
        let mut editor = MemoryEditor::new();
        let image = DynamicImage::ImageRgba8(solid(5, 4, [1, 2, 3, 255]));
        let (doc, layer) = editor.open_image("Photo", &image).unwrap();

        let drawable = editor.drawable(doc, layer).unwrap();
        assert_eq!(drawable.name(), "Photo");
        assert_eq!((drawable.width(), drawable.height()), (5, 4));

        let png = drawable.export_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (5, 4));
        assert_eq!(decoded.get_pixel(2, 2), &Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_select_unknown_layer_fails() {
        let mut editor = MemoryEditor::new();
        let doc = editor.create_document(1, 1).unwrap();
        assert!(editor.select_layer(doc, LayerId(42)).is_err());
    }
}
