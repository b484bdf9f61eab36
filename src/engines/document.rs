use super::{
    flatten_to_rgb, run_blocking, single_input, Artifact, ConvertEngine, ConvertOptions,
    EngineType, DOCX_CONTENT_TYPE, PDF_CONTENT_TYPE,
};
use crate::docx::{self, Block};
use crate::error::{AppError, Result};
use crate::pdf::{paginate, wrap_paragraph, PdfWriter, CHARS_PER_LINE};
use crate::registry::Operation;
use crate::staging::StagedFile;
use async_trait::async_trait;
use docx_rs::{BreakType, Docx, Paragraph, Run};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// In-process document backend.
///
/// `pdf-to-docx` extracts text page by page and writes one Word paragraph per
/// line with a page break between source pages. `docx-to-pdf` is the degraded
/// renderer: paragraph text only, with embedded pictures optionally placed on
/// pages of their own. No layout or styling survives either direction.
pub struct DocumentEngine {
    /// Cap on bytes decompressed out of one Word package.
    max_expanded: u64,
}

/// How far a Word package may expand relative to the upload limit.
const EXPANSION_FACTOR: u64 = 10;

impl DocumentEngine {
    pub fn new() -> Self {
        Self::with_upload_limit(25 * 1024 * 1024)
    }

    pub fn with_upload_limit(max_upload_bytes: usize) -> Self {
        Self {
            max_expanded: (max_upload_bytes as u64).saturating_mul(EXPANSION_FACTOR),
        }
    }
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(cause: impl std::fmt::Display) -> AppError {
    AppError::conversion(EngineType::Document, cause)
}

fn pdf_to_docx(input: &Path, output: &Path) -> Result<()> {
    let pdf = lopdf::Document::load(input).map_err(|e| failed(format!("unreadable PDF: {}", e)))?;
    if pdf.is_encrypted() {
        return Err(failed("PDF is encrypted"));
    }

    let pages = pdf.get_pages();
    if pages.is_empty() {
        return Err(failed("PDF has no pages"));
    }

    let mut docx = Docx::new();
    let page_count = pages.len();
    for (index, page_number) in pages.keys().enumerate() {
        let text = match pdf.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(e) => {
                warn!("No text extracted from page {}: {}", page_number, e);
                String::new()
            }
        };
        debug!("Page {}: {} chars", page_number, text.len());

        for line in text.lines().map(str::trim_end) {
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)));
        }
        if index + 1 < page_count {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
            );
        }
    }

    let file = std::fs::File::create(output)
        .map_err(|e| failed(format!("cannot create output: {}", e)))?;
    docx.build()
        .pack(file)
        .map_err(|e| failed(format!("cannot write Word package: {}", e)))?;
    Ok(())
}

fn docx_to_pdf(
    input: &Path,
    output: &Path,
    images_on_own_page: bool,
    max_expanded: u64,
) -> Result<()> {
    let bytes = std::fs::read(input).map_err(|e| failed(format!("cannot read input: {}", e)))?;
    let blocks = docx::read_blocks(&bytes, max_expanded).map_err(failed)?;

    let mut writer = PdfWriter::new();
    let mut lines: Vec<String> = Vec::new();

    for block in blocks {
        match block {
            Block::Paragraph(text) => lines.extend(wrap_paragraph(&text, CHARS_PER_LINE)),
            Block::Image { name, data } if images_on_own_page => {
                let decoded = match image::load_from_memory(&data) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!("Skipping embedded image {}: {}", name, e);
                        continue;
                    }
                };
                for page in paginate(std::mem::take(&mut lines)) {
                    if !page.is_empty() {
                        writer.add_text_page(&page).map_err(failed)?;
                    }
                }
                let rgb = flatten_to_rgb(decoded);
                writer.add_fitted_image_page(rgb).map_err(failed)?;
            }
            Block::Image { .. } => {}
        }
    }

    let has_trailing_text = lines.iter().any(|l| !l.trim().is_empty());
    if has_trailing_text || writer.page_count() == 0 {
        for page in paginate(lines) {
            writer.add_text_page(&page).map_err(failed)?;
        }
    }

    writer.save(output).map_err(failed)
}

#[async_trait]
impl ConvertEngine for DocumentEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Document
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        operation: Operation,
        inputs: &[StagedFile],
        output_dir: &Path,
        options: &ConvertOptions,
    ) -> Result<Artifact> {
        let input = single_input(EngineType::Document, inputs)?;
        let source = input.path.clone();
        let stem = input.original_stem().to_string();

        match operation {
            Operation::PdfToDocx => {
                info!("Converting {} to DOCX in-process", input.original_name);
                let output: PathBuf = output_dir.join("document.docx");
                let target = output.clone();
                run_blocking(EngineType::Document, move || pdf_to_docx(&source, &target)).await?;
                Ok(Artifact {
                    path: output,
                    filename: format!("{}.docx", stem),
                    content_type: DOCX_CONTENT_TYPE,
                })
            }
            Operation::DocxToPdf => {
                info!(
                    "Rendering {} to PDF in-process (text only)",
                    input.original_name
                );
                let output = output_dir.join("document.pdf");
                let target = output.clone();
                let images = options.images_on_own_page;
                let max_expanded = self.max_expanded;
                run_blocking(EngineType::Document, move || {
                    docx_to_pdf(&source, &target, images, max_expanded)
                })
                .await?;
                Ok(Artifact {
                    path: output,
                    filename: format!("{}.pdf", stem),
                    content_type: PDF_CONTENT_TYPE,
                })
            }
            other => Err(failed(format!("{} is not a document operation", other))),
        }
    }
}
