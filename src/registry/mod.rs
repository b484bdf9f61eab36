use crate::config::{Config, DocxPdfEngine};
use crate::engines::{ConvertEngine, DocumentEngine, EngineType, ImageEngine, LibreOfficeEngine};
use crate::error::{AppError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "webp"];

/// A fixed source→target conversion exposed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    PdfToDocx,
    DocxToPdf,
    ImageToPdf,
    ImagesToPdf,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::PdfToDocx,
        Operation::DocxToPdf,
        Operation::ImageToPdf,
        Operation::ImagesToPdf,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Operation::PdfToDocx => "pdf-to-docx",
            Operation::DocxToPdf => "docx-to-pdf",
            Operation::ImageToPdf => "image-to-pdf",
            Operation::ImagesToPdf => "images-to-pdf",
        }
    }

    /// Tag stored with audit records.
    pub fn audit_kind(&self) -> &'static str {
        match self {
            Operation::PdfToDocx => "pdf_to_docx",
            Operation::DocxToPdf => "docx_to_pdf",
            Operation::ImageToPdf => "image_to_pdf",
            Operation::ImagesToPdf => "images_to_pdf",
        }
    }

    pub fn accepted_extensions(&self) -> &'static [&'static str] {
        match self {
            Operation::PdfToDocx => &["pdf"],
            Operation::DocxToPdf => &["docx", "doc"],
            Operation::ImageToPdf | Operation::ImagesToPdf => IMAGE_EXTENSIONS,
        }
    }

    pub fn accepts_batch(&self) -> bool {
        matches!(self, Operation::ImagesToPdf)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Operation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.slug() == s)
            .ok_or_else(|| AppError::UnknownOperation(s.to_string()))
    }
}

/// Maps an operation and staged extension to the backend that serves it.
pub struct ConverterRegistry {
    document: Arc<dyn ConvertEngine>,
    office: Arc<dyn ConvertEngine>,
    image: Arc<dyn ConvertEngine>,
    docx_pdf_engine: DocxPdfEngine,
    /// Cached availability results from startup
    availability: HashMap<EngineType, bool>,
}

impl ConverterRegistry {
    pub async fn new(config: &Config) -> Self {
        let mut office = LibreOfficeEngine::new(config.office_timeout());
        if let Some(path) = &config.soffice_path {
            office = office.with_soffice_path(path.clone());
        }

        Self::with_engines(
            Arc::new(DocumentEngine::with_upload_limit(config.max_upload_bytes)),
            Arc::new(office),
            Arc::new(ImageEngine::new()),
            config.docx_pdf_engine,
        )
        .await
    }

    pub async fn with_engines(
        document: Arc<dyn ConvertEngine>,
        office: Arc<dyn ConvertEngine>,
        image: Arc<dyn ConvertEngine>,
        docx_pdf_engine: DocxPdfEngine,
    ) -> Self {
        // Cache engine availability at startup
        let mut availability = HashMap::new();
        for engine in [&document, &office, &image] {
            let available = engine.is_available().await;
            let status = if available { "✓" } else { "✗" };
            info!("{} {} engine", status, engine.engine_type());
            availability.insert(engine.engine_type(), available);
        }

        if docx_pdf_engine == DocxPdfEngine::Auto
            && !availability.get(&office.engine_type()).copied().unwrap_or(false)
        {
            warn!("LibreOffice unavailable; docx-to-pdf will use the text-only renderer");
        }

        Self {
            document,
            office,
            image,
            docx_pdf_engine,
            availability,
        }
    }

    fn is_available(&self, engine: &Arc<dyn ConvertEngine>) -> bool {
        self.availability
            .get(&engine.engine_type())
            .copied()
            .unwrap_or(false)
    }

    /// Check `extension` against the operation's allowed set and pick a backend.
    pub fn resolve(&self, operation: Operation, extension: &str) -> Result<Arc<dyn ConvertEngine>> {
        let ext = extension.to_lowercase();
        let accepted = operation.accepted_extensions();
        if !accepted.contains(&ext.as_str()) {
            return Err(AppError::UnsupportedFormat {
                operation,
                extension: ext,
                accepted: accepted.to_vec(),
            });
        }

        let engine = match operation {
            Operation::PdfToDocx => &self.document,
            Operation::ImageToPdf | Operation::ImagesToPdf => &self.image,
            Operation::DocxToPdf => match self.docx_pdf_engine {
                DocxPdfEngine::Library => &self.document,
                DocxPdfEngine::Office => &self.office,
                DocxPdfEngine::Auto if self.is_available(&self.office) => &self.office,
                DocxPdfEngine::Auto => &self.document,
            },
        };

        if !self.is_available(engine) {
            return Err(AppError::EngineNotAvailable(format!(
                "{} requires the {} engine, which is not installed",
                operation,
                engine.engine_type()
            )));
        }

        Ok(Arc::clone(engine))
    }

    /// Startup availability per engine, for the info endpoint.
    pub fn availability(&self) -> HashMap<String, bool> {
        self.availability
            .iter()
            .map(|(engine, available)| (engine.to_string(), *available))
            .collect()
    }
}
