//! PDF text extraction with an explicit engine escalation chain.
//!
//! Engines are tried in a fixed preference order and an empty result always
//! escalates to the next available engine: text-layer extraction first, OCR
//! when the text layer yields nothing, then a minimal fallback extractor.
//! The chain is resolved once per run from the configured choice and the
//! probed availability of each engine.

mod minimal;
pub mod ocr;
mod text_layer;

pub use minimal::MinimalEngine;
pub use ocr::OcrEngine;
pub use text_layer::TextLayerEngine;

use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;

/// Which kind of extraction produced a text, used to label match methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFamily {
    TextLayer,
    Ocr,
}

/// Configured engine preference. `Auto` uses the default order; a specific
/// choice moves that engine to the front and keeps the rest as fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineChoice {
    #[default]
    Auto,
    TextLayer,
    Ocr,
    Minimal,
}

impl FromStr for EngineChoice {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "text_layer" | "text" => Ok(Self::TextLayer),
            "ocr" => Ok(Self::Ocr),
            "minimal" => Ok(Self::Minimal),
            other => Err(format!("invalid PDF engine choice: {other}")),
        }
    }
}

/// One PDF-to-text capability provider in the escalation chain.
pub trait TextEngine: Send {
    fn name(&self) -> &'static str;

    fn family(&self) -> EngineFamily;

    /// Probed once when the chain is built, not per attachment.
    fn is_available(&self) -> bool;

    fn extract(&self, pdf: &[u8], cancel: &CancelFlag) -> Result<String>;
}

/// Outcome of running the chain over one attachment.
#[derive(Debug)]
pub enum Extraction {
    /// Some engine produced non-empty text.
    Text { family: EngineFamily, text: String },
    /// Every available engine ran and none produced text.
    Empty,
    /// Every available engine errored out.
    Failed(String),
    /// No PDF-capable engine is installed at all.
    MissingDependencies,
}

pub struct PdfTextExtractor {
    engines: Vec<Box<dyn TextEngine>>,
}

impl PdfTextExtractor {
    /// Builds the chain for one search run. Unavailable engines are dropped
    /// here so per-attachment extraction never re-probes.
    pub fn new(choice: EngineChoice, ocr_language: &str) -> Self {
        let mut candidates: Vec<Box<dyn TextEngine>> = vec![
            Box::new(TextLayerEngine),
            Box::new(OcrEngine::new(ocr_language)),
            Box::new(MinimalEngine),
        ];

        let preferred = match choice {
            EngineChoice::Auto => None,
            EngineChoice::TextLayer => Some("text-layer"),
            EngineChoice::Ocr => Some("ocr"),
            EngineChoice::Minimal => Some("minimal"),
        };
        if let Some(name) = preferred {
            if let Some(index) = candidates.iter().position(|e| e.name() == name) {
                let engine = candidates.remove(index);
                candidates.insert(0, engine);
            }
        }

        let engines: Vec<Box<dyn TextEngine>> = candidates
            .into_iter()
            .filter(|engine| {
                let available = engine.is_available();
                if !available {
                    warn!("PDF engine '{}' is not available", engine.name());
                }
                available
            })
            .collect();

        debug!(
            "PDF engine chain: [{}]",
            engines
                .iter()
                .map(|e| e.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self { engines }
    }

    /// Builds an extractor from an explicit engine list. Used by hosts and
    /// tests that need full control over the chain.
    pub fn with_engines(engines: Vec<Box<dyn TextEngine>>) -> Self {
        Self { engines }
    }

    pub fn has_engines(&self) -> bool {
        !self.engines.is_empty()
    }

    /// Runs the chain until an engine yields non-empty text.
    pub fn extract_text(&self, pdf: &[u8], cancel: &CancelFlag) -> Extraction {
        if self.engines.is_empty() {
            return Extraction::MissingDependencies;
        }

        let mut last_error = None;
        let mut any_succeeded = false;

        for engine in &self.engines {
            if cancel.is_cancelled() {
                break;
            }

            match engine.extract(pdf, cancel) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("engine '{}' produced {} chars", engine.name(), text.len());
                    return Extraction::Text {
                        family: engine.family(),
                        text,
                    };
                }
                Ok(_) => {
                    any_succeeded = true;
                    debug!("engine '{}' produced no text, escalating", engine.name());
                }
                Err(error) => {
                    warn!("engine '{}' failed: {error:#}", engine.name());
                    last_error = Some(format!("{}: {error:#}", engine.name()));
                }
            }
        }

        match (any_succeeded, last_error) {
            (false, Some(error)) => Extraction::Failed(error),
            _ => Extraction::Empty,
        }
    }
}
