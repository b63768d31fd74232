use anyhow::{Context, Result};

use crate::cancel::CancelFlag;

use super::{EngineFamily, TextEngine};

/// Layout-aware text-layer extraction. Fast, pure Rust, and the right
/// answer for every PDF that actually carries a text layer.
pub struct TextLayerEngine;

impl TextEngine for TextLayerEngine {
    fn name(&self) -> &'static str {
        "text-layer"
    }

    fn family(&self) -> EngineFamily {
        EngineFamily::TextLayer
    }

    fn is_available(&self) -> bool {
        true
    }

    fn extract(&self, pdf: &[u8], _cancel: &CancelFlag) -> Result<String> {
        pdf_extract::extract_text_from_mem(pdf).context("text-layer extraction")
    }
}
