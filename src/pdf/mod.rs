//! Minimal PDF page writer on top of `lopdf`.
//!
//! Produces two kinds of pages: wrapped Helvetica text on A4, and a single
//! full-bleed RGB image. Image streams are Flate-compressed as they are added,
//! everything else on save.

use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const A4_WIDTH: i64 = 595;
pub const A4_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const FONT_SIZE: i64 = 11;
const LEADING: i64 = 14;
/// Helvetica at 11pt averages roughly 5.5pt per glyph over the text column.
pub const CHARS_PER_LINE: usize = 88;
pub const LINES_PER_PAGE: usize = ((A4_HEIGHT - 2 * MARGIN) / LEADING) as usize;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF encoding failed: {0}")]
    Encode(#[from] lopdf::Error),

    #[error("PDF write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("document has no pages")]
    Empty,
}

pub struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        Self {
            doc,
            pages_id,
            font_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Add one A4 page of pre-wrapped lines. Lines past the page capacity are ignored;
    /// callers paginate with [`paginate`].
    pub fn add_text_page(&mut self, lines: &[String]) -> Result<(), PdfError> {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
            Operation::new("TL", vec![LEADING.into()]),
            Operation::new(
                "Td",
                vec![MARGIN.into(), (A4_HEIGHT - MARGIN - FONT_SIZE).into()],
            ),
        ];
        for line in lines.iter().take(LINES_PER_PAGE) {
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(encode_win_ansi(line))],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }.encode()?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let resources = dictionary! {
            "Font" => dictionary! { "F1" => self.font_id },
        };
        self.push_page(content_id, resources, A4_WIDTH, A4_HEIGHT);
        Ok(())
    }

    /// Add a page sized exactly to the image, one point per pixel.
    pub fn add_image_page(&mut self, image: RgbImage) -> Result<(), PdfError> {
        let (width, height) = (image.width() as i64, image.height() as i64);
        self.add_image(image, width, height, 0, 0, width, height)
    }

    /// Add an A4 page with the image scaled down (never up) to fit the margins, centered.
    pub fn add_fitted_image_page(&mut self, image: RgbImage) -> Result<(), PdfError> {
        let (img_w, img_h) = (image.width().max(1) as i64, image.height().max(1) as i64);
        let (box_w, box_h) = (A4_WIDTH - 2 * MARGIN, A4_HEIGHT - 2 * MARGIN);

        let (draw_w, draw_h) = if img_w <= box_w && img_h <= box_h {
            (img_w, img_h)
        } else if img_w * box_h > img_h * box_w {
            (box_w, (img_h * box_w / img_w).max(1))
        } else {
            ((img_w * box_h / img_h).max(1), box_h)
        };

        let x = (A4_WIDTH - draw_w) / 2;
        let y = (A4_HEIGHT - draw_h) / 2;
        self.add_image(image, A4_WIDTH, A4_HEIGHT, x, y, draw_w, draw_h)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_image(
        &mut self,
        image: RgbImage,
        page_w: i64,
        page_h: i64,
        x: i64,
        y: i64,
        draw_w: i64,
        draw_h: i64,
    ) -> Result<(), PdfError> {
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width() as i64,
                "Height" => image.height() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            image.into_raw(),
        );
        // Only the compressed pixels are held until save.
        stream.compress()?;
        let image_id = self.doc.add_object(stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        draw_w.into(),
                        0.into(),
                        0.into(),
                        draw_h.into(),
                        x.into(),
                        y.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        }
        .encode()?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        self.push_page(content_id, resources, page_w, page_h);
        Ok(())
    }

    fn push_page(
        &mut self,
        content_id: ObjectId,
        resources: lopdf::Dictionary,
        width: i64,
        height: i64,
    ) {
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        });
        self.kids.push(page_id.into());
    }

    /// Finalize the page tree and write the document.
    pub fn save(mut self, path: &Path) -> Result<(), PdfError> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&mut self, target: &mut W) -> Result<(), PdfError> {
        if self.kids.is_empty() {
            return Err(PdfError::Empty);
        }

        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids.clone(),
            "Count" => count,
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        self.doc.save_to(target)?;
        Ok(())
    }
}

/// Map text onto WinAnsi bytes; anything outside Latin-1 becomes `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\t' => b' ',
            c if (c as u32) < 0x20 => b' ',
            c if (c as u32) < 0x100 => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

/// Greedy word wrap to `width` characters. Empty paragraphs keep a blank line.
pub fn wrap_paragraph(paragraph: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in paragraph.split('\n') {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let mut word = word.to_string();
            while word.chars().count() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let head: String = word.chars().take(width).collect();
                word = word.chars().skip(width).collect();
                lines.push(head);
            }
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };
            if needed > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    lines
}

/// Split lines into page-sized chunks.
pub fn paginate(lines: Vec<String>) -> Vec<Vec<String>> {
    if lines.is_empty() {
        return vec![Vec::new()];
    }
    lines
        .chunks(LINES_PER_PAGE)
        .map(|chunk| chunk.to_vec())
        .collect()
}
