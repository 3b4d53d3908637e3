// backend/src/pdf.rs
//
// PDF text extraction is a library boundary: the service only depends on
// this trait, the implementation wraps the extraction crates. OCR for
// scanned documents lives behind the same boundary in a separate worker and
// is not part of this process.

use crate::errors::AppError;

pub trait PdfExtractor: Send + Sync {
    /// Extracts `(full_text, page_count)` from raw PDF bytes.
    fn extract_text(&self, bytes: &[u8]) -> Result<(String, u32), AppError>;
}

pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<(String, u32), AppError> {
        let page_count = lopdf::Document::load_mem(bytes)
            .map(|doc| doc.get_pages().len() as u32)
            .map_err(|e| AppError::BadRequest(format!("not a readable PDF: {e}")))?;

        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AppError::BadRequest(format!("could not extract PDF text: {e}")))?;

        Ok((text, page_count))
    }
}
