//! Word package reader.
//!
//! Walks `word/document.xml` in body order and yields paragraph text and
//! embedded pictures. Pictures are resolved through
//! `word/_rels/document.xml.rels` to their `word/media/*` parts.
//! Styling, tables and numbering are flattened to plain paragraph text.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use thiserror::Error;
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("not a Word package: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("package expands past {0} bytes")]
    TooLarge(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    /// Raw bytes of an embedded media part.
    Image { name: String, data: Vec<u8> },
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

/// Decompressed bytes a package may yield across all parts read.
struct Budget {
    limit: u64,
    remaining: u64,
}

impl Budget {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    budget: &mut Budget,
) -> Result<Option<Vec<u8>>, DocxError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.take(budget.remaining.saturating_add(1)).read_to_end(&mut buf)?;
    let read = buf.len() as u64;
    if read > budget.remaining {
        return Err(DocxError::TooLarge(budget.limit));
    }
    budget.remaining -= read;
    Ok(Some(buf))
}

/// Map relationship ids to archive paths (`rId4` -> `word/media/image1.png`).
fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, DocxError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    let target = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("word/{}", target),
                    };
                    rels.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Read all blocks of a `.docx` package held in memory.
///
/// At most `max_expanded` bytes are decompressed in total. Paragraphs nested
/// inside another (text boxes) are emitted before the paragraph holding them.
pub fn read_blocks(bytes: &[u8], max_expanded: u64) -> Result<Vec<Block>, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut budget = Budget::new(max_expanded);

    let document = read_part(&mut archive, DOCUMENT_PART, &mut budget)?
        .ok_or(zip::result::ZipError::FileNotFound)?;
    let rels = match read_part(&mut archive, RELS_PART, &mut budget)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let mut reader = Reader::from_reader(document.as_slice());
    let mut buf = Vec::new();
    let mut blocks = Vec::new();
    // One buffer per open `w:p`, innermost last.
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut pending_images: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => open.push(String::new()),
                b"w:t" => in_text = true,
                b"a:blip" => pending_images.extend(attr(&e, b"r:embed")),
                _ => {}
            },
            Event::Empty(e) => match (e.name().as_ref(), open.last_mut()) {
                (b"w:p", _) => blocks.push(Block::Paragraph(String::new())),
                (b"w:tab", Some(paragraph)) => paragraph.push('\t'),
                (b"w:br" | b"w:cr", Some(paragraph)) => paragraph.push('\n'),
                (b"a:blip", _) => pending_images.extend(attr(&e, b"r:embed")),
                _ => {}
            },
            Event::Text(t) if in_text => {
                if let Some(paragraph) = open.last_mut() {
                    paragraph.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let Some(paragraph) = open.pop() else {
                        continue;
                    };
                    blocks.push(Block::Paragraph(paragraph));
                    for rel_id in pending_images.drain(..) {
                        let Some(target) = rels.get(&rel_id) else {
                            continue;
                        };
                        if let Some(data) = read_part(&mut archive, target, &mut budget)? {
                            blocks.push(Block::Image {
                                name: target.clone(),
                                data,
                            });
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) const UNLIMITED: u64 = u64::MAX;

    /// Assemble a minimal Word package from a `<w:body>` fragment and media parts.
    pub(crate) fn build_docx(body: &str, media: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();

            zip.start_file("word/document.xml", options).unwrap();
            write!(
                zip,
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{}</w:body></w:document>"#,
                body
            )
            .unwrap();

            let mut rels = String::from(
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            );
            for (id, target, data) in media {
                rels.push_str(&format!(
                    r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="{}"/>"#,
                    id, target
                ));
                zip.start_file(format!("word/{}", target), options).unwrap();
                zip.write_all(data).unwrap();
            }
            rels.push_str("</Relationships>");
            zip.start_file("word/_rels/document.xml.rels", options)
                .unwrap();
            zip.write_all(rels.as_bytes()).unwrap();

            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_reads_paragraph_text_in_order() {
        let docx = build_docx(
            r#"<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world &amp; more</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:t>Second</w:t><w:tab/><w:t>col</w:t><w:br/><w:t>line</w:t></w:r></w:p>"#,
            &[],
        );

        let blocks = read_blocks(&docx, UNLIMITED).unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("Hello world & more".to_string()),
                Block::Paragraph(String::new()),
                Block::Paragraph("Second\tcol\nline".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolves_embedded_images() {
        let docx = build_docx(
            r#"<w:p><w:r><w:t>Figure</w:t></w:r></w:p>
<w:p><w:r><w:drawing><a:graphic><a:graphicData><a:blip r:embed="rId7"/></a:graphicData></a:graphic></w:drawing></w:r></w:p>"#,
            &[("rId7", "media/image1.png", b"PNGDATA")],
        );

        let blocks = read_blocks(&docx, UNLIMITED).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[2],
            Block::Image {
                name: "word/media/image1.png".to_string(),
                data: b"PNGDATA".to_vec(),
            }
        );
    }

    #[test]
    fn test_rejects_non_zip() {
        assert!(matches!(
            read_blocks(b"plain text, not a package", UNLIMITED),
            Err(DocxError::Archive(_))
        ));
    }

    #[test]
    fn test_text_box_paragraphs_keep_surrounding_text() {
        let docx = build_docx(
            r#"<w:p><w:r><w:t>Before</w:t></w:r><w:r><w:pict><w:txbxContent><w:p><w:r><w:t>Boxed</w:t></w:r></w:p></w:txbxContent></w:pict></w:r><w:r><w:t> after</w:t></w:r></w:p>
<w:p><w:r><w:t>Next</w:t></w:r></w:p>"#,
            &[],
        );

        let blocks = read_blocks(&docx, UNLIMITED).unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("Boxed".to_string()),
                Block::Paragraph("Before after".to_string()),
                Block::Paragraph("Next".to_string()),
            ]
        );
    }

    #[test]
    fn test_expansion_limit_stops_oversized_parts() {
        let filler = "<w:p><w:r><w:t>padding padding padding</w:t></w:r></w:p>".repeat(2000);
        let docx = build_docx(&filler, &[]);
        assert!(docx.len() < 20_000);

        assert!(matches!(
            read_blocks(&docx, 20_000),
            Err(DocxError::TooLarge(20_000))
        ));
        assert!(read_blocks(&docx, UNLIMITED).is_ok());
    }
}
