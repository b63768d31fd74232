//! OCR extraction through external `pdftoppm` and `tesseract` binaries.
//!
//! Pages are rasterized at 200 DPI and recognized one by one, requesting the
//! configured language together with English and falling back to English
//! alone when that model is missing. The cancellation flag is honored
//! between pages and accumulated text is returned as a partial result.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;

use super::{EngineFamily, TextEngine};

pub const OCR_DPI: u32 = 200;

/// Well-known install locations probed before falling back to PATH lookup.
const PDFTOPPM_WELL_KNOWN: &[&str] = &[
    "/usr/bin/pdftoppm",
    "/usr/local/bin/pdftoppm",
    "/opt/homebrew/bin/pdftoppm",
    r"C:\poppler\Library\bin\pdftoppm.exe",
    r"C:\Program Files\poppler\Library\bin\pdftoppm.exe",
];

const TESSERACT_WELL_KNOWN: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
];

pub struct OcrEngine {
    pdftoppm: Option<PathBuf>,
    tesseract: Option<PathBuf>,
    language: String,
}

impl OcrEngine {
    /// Locates both binaries once. `language` is the primary recognition
    /// language, e.g. `pol`.
    pub fn new(language: &str) -> Self {
        let pdftoppm = locate_binary(PDFTOPPM_WELL_KNOWN, "pdftoppm", "-v");
        let tesseract = locate_binary(TESSERACT_WELL_KNOWN, "tesseract", "--version");

        if pdftoppm.is_none() {
            debug!("pdftoppm not found; OCR engine unavailable");
        }
        if tesseract.is_none() {
            debug!("tesseract not found; OCR engine unavailable");
        }

        Self {
            pdftoppm,
            tesseract,
            language: language.to_string(),
        }
    }

    fn recognize_page(&self, tesseract: &Path, page: &Path) -> Result<String> {
        let dual = format!("{}+eng", self.language);
        match run_tesseract(tesseract, page, &dual) {
            Ok(text) => Ok(text),
            Err(error) => {
                // The dual-language model may not be installed.
                warn!("tesseract '{dual}' failed ({error:#}); retrying with English only");
                run_tesseract(tesseract, page, "eng")
            }
        }
    }
}

impl TextEngine for OcrEngine {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn family(&self) -> EngineFamily {
        EngineFamily::Ocr
    }

    fn is_available(&self) -> bool {
        self.pdftoppm.is_some() && self.tesseract.is_some()
    }

    fn extract(&self, pdf: &[u8], cancel: &CancelFlag) -> Result<String> {
        let (Some(pdftoppm), Some(tesseract)) = (&self.pdftoppm, &self.tesseract) else {
            bail!("OCR binaries are not available");
        };

        let workdir = tempfile::Builder::new()
            .prefix("invoscan-ocr-")
            .tempdir()
            .context("create OCR work directory")?;

        let input = workdir.path().join("input.pdf");
        std::fs::write(&input, pdf).context("write PDF to OCR work directory")?;

        let pages = rasterize(pdftoppm, &input, workdir.path())?;
        debug!("rasterized {} page(s) for OCR", pages.len());

        let mut text = String::new();
        for (index, page) in pages.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("OCR cancelled after {index} of {} page(s)", pages.len());
                break;
            }

            let page_text = self.recognize_page(tesseract, page)?;
            if !page_text.is_empty() {
                text.push_str(&page_text);
                text.push('\n');
            }
        }

        Ok(text)
    }
}

fn locate_binary(well_known: &[&str], name: &str, probe_arg: &str) -> Option<PathBuf> {
    for candidate in well_known {
        if Path::new(candidate).exists() {
            return Some(PathBuf::from(candidate));
        }
    }

    // Not in a well-known location; usable if it spawns from PATH.
    Command::new(name)
        .arg(probe_arg)
        .output()
        .is_ok()
        .then(|| PathBuf::from(name))
}

fn rasterize(pdftoppm: &Path, input: &Path, workdir: &Path) -> Result<Vec<PathBuf>> {
    let prefix = workdir.join("page");
    let output = Command::new(pdftoppm)
        .arg("-r")
        .arg(OCR_DPI.to_string())
        .arg("-png")
        .arg(input)
        .arg(&prefix)
        .output()
        .context("run pdftoppm")?;

    if !output.status.success() {
        bail!(
            "pdftoppm exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    // pdftoppm pads page numbers to a fixed width, so a name sort is a page
    // sort.
    let mut pages: Vec<PathBuf> = std::fs::read_dir(workdir)
        .context("list rasterized pages")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pages.sort();

    if pages.is_empty() {
        bail!("pdftoppm produced no pages");
    }
    Ok(pages)
}

fn run_tesseract(tesseract: &Path, page: &Path, language: &str) -> Result<String> {
    let output = Command::new(tesseract)
        .arg(page)
        .arg("stdout")
        .arg("-l")
        .arg(language)
        .output()
        .context("run tesseract")?;

    if !output.status.success() {
        bail!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
