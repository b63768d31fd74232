use anyhow::{Context, Result};
use lopdf::Document;

use crate::cancel::CancelFlag;

use super::{EngineFamily, TextEngine};

/// Last-resort extractor working page by page directly on the PDF content
/// streams. Less faithful to layout than the text-layer engine but tolerant
/// of documents the other engines reject.
pub struct MinimalEngine;

impl TextEngine for MinimalEngine {
    fn name(&self) -> &'static str {
        "minimal"
    }

    fn family(&self) -> EngineFamily {
        EngineFamily::TextLayer
    }

    fn is_available(&self) -> bool {
        true
    }

    fn extract(&self, pdf: &[u8], cancel: &CancelFlag) -> Result<String> {
        let mut doc = Document::load_mem(pdf).context("load PDF document")?;

        // Some invoices ship encrypted with an empty password.
        if doc.is_encrypted() {
            doc.decrypt("").context("decrypt PDF with empty password")?;
        }

        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        let mut text = String::new();
        for page in pages {
            if cancel.is_cancelled() {
                break;
            }
            if let Ok(page_text) = doc.extract_text(&[page]) {
                if !page_text.is_empty() {
                    text.push_str(&page_text);
                    text.push('\n');
                }
            }
        }

        Ok(text)
    }
}
