//! Identifier matching against extracted document text.
//!
//! The identifier is matched digits-only against whitespace-stripped text,
//! then in its conventional hyphenated renderings, and finally through a
//! normalized fuzzy pass that strips separator characters from both sides.

use serde::Serialize;

use crate::pdftext::EngineFamily;

/// Hard cap on reported snippets to keep results displayable.
pub const MAX_SNIPPETS: usize = 5;

const CONTEXT_BEFORE: usize = 50;
const CONTEXT_AFTER: usize = 50;
const CONTEXT_AFTER_APPROXIMATE: usize = 100;
const APPROXIMATE_TAG: &str = "[approximate match] ";

/// How a match (or non-match) was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    TextExtraction,
    TextExtractionNormalized,
    Ocr,
    OcrNormalized,
    NotFound,
    Error,
    MissingDependencies,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub found: bool,
    pub method: MatchMethod,
    /// Bounded context windows around matches, deduplicated, at most
    /// [`MAX_SNIPPETS`]. Fuzzy matches are tagged as approximate because
    /// their offsets are recovered by counting and cannot be exact.
    pub snippets: Vec<String>,
    pub error: Option<String>,
}

impl MatchResult {
    pub fn not_found() -> Self {
        Self::miss(MatchMethod::NotFound)
    }

    pub fn missing_dependencies() -> Self {
        Self::miss(MatchMethod::MissingDependencies)
    }

    pub fn cancelled() -> Self {
        Self::miss(MatchMethod::Cancelled)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            found: false,
            method: MatchMethod::Error,
            snippets: Vec::new(),
            error: Some(message.into()),
        }
    }

    fn miss(method: MatchMethod) -> Self {
        Self {
            found: false,
            method,
            snippets: Vec::new(),
            error: None,
        }
    }

    /// Relabels text-extraction methods as their OCR counterparts when the
    /// text came out of the OCR engine.
    pub fn for_family(mut self, family: EngineFamily) -> Self {
        if family == EngineFamily::Ocr {
            self.method = match self.method {
                MatchMethod::TextExtraction => MatchMethod::Ocr,
                MatchMethod::TextExtractionNormalized => MatchMethod::OcrNormalized,
                other => other,
            };
        }
        self
    }
}

/// Looks for `raw_identifier` in `full_text`.
pub fn match_identifier(full_text: &str, raw_identifier: &str) -> MatchResult {
    let digits: String = raw_identifier
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let needle = if digits.is_empty() {
        raw_identifier.trim().to_string()
    } else {
        digits
    };
    if needle.is_empty() {
        return MatchResult::not_found();
    }

    // The identifier as a plain digit run, with the conventional hyphen
    // groupings of a 10-digit NIP as alternates.
    let mut patterns = vec![needle.clone()];
    if needle.len() == 10 && needle.chars().all(|c| c.is_ascii_digit()) {
        patterns.push(format!(
            "{}-{}-{}-{}",
            &needle[..3],
            &needle[3..6],
            &needle[6..8],
            &needle[8..]
        ));
        patterns.push(format!("{}-{}", &needle[..3], &needle[3..]));
    }

    let stripped_text: String = full_text.chars().filter(|c| !c.is_whitespace()).collect();
    let exact = stripped_text.contains(&needle)
        || patterns[1..].iter().any(|p| full_text.contains(p.as_str()));

    let mut snippets = Vec::new();
    if exact {
        for pattern in &patterns {
            collect_exact_snippets(full_text, pattern, &mut snippets);
            if snippets.len() >= MAX_SNIPPETS {
                break;
            }
        }
        if snippets.is_empty() {
            // Matched only after whitespace stripping; recover approximate
            // windows through the normalized offsets.
            collect_normalized_snippets(full_text, &needle, &mut snippets);
        }
        return MatchResult {
            found: true,
            method: MatchMethod::TextExtraction,
            snippets,
            error: None,
        };
    }

    if needle.chars().count() > 3 {
        let found = collect_normalized_snippets(full_text, &needle, &mut snippets);
        if found {
            return MatchResult {
                found: true,
                method: MatchMethod::TextExtractionNormalized,
                snippets,
                error: None,
            };
        }
    }

    MatchResult::not_found()
}

/// Characters ignored by the normalized comparison. Covers the separators
/// invoices conventionally put inside an identifier.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/' | '\\')
}

fn collect_exact_snippets(text: &str, pattern: &str, out: &mut Vec<String>) {
    let mut start = 0;
    while let Some(offset) = text[start..].find(pattern) {
        let pos = start + offset;
        let from = floor_char_boundary(text, pos.saturating_sub(CONTEXT_BEFORE));
        let to = ceil_char_boundary(text, (pos + pattern.len() + CONTEXT_AFTER).min(text.len()));
        let context = text[from..to].trim().to_string();
        if !out.contains(&context) {
            out.push(context);
        }
        if out.len() >= MAX_SNIPPETS {
            return;
        }
        start = ceil_char_boundary(text, pos + 1);
    }
}

/// Strips separators from both sides and substring-searches. On a hit the
/// position in the original text is recovered by counting non-separator
/// characters, which is approximate whenever separator runs of different
/// lengths precede the match. Good enough for a human-reviewed snippet, not
/// for automated re-location.
fn collect_normalized_snippets(text: &str, needle: &str, out: &mut Vec<String>) -> bool {
    let normalized_needle: String = needle.chars().filter(|c| !is_separator(*c)).collect();
    if normalized_needle.is_empty() {
        return false;
    }
    let normalized_text: String = text.chars().filter(|c| !is_separator(*c)).collect();

    let mut found = false;
    let mut start = 0;
    while let Some(offset) = normalized_text[start..].find(&normalized_needle) {
        let pos = start + offset;
        found = true;

        let chars_before = normalized_text[..pos].chars().count();
        let mut approx = 0;
        let mut count = 0;
        for (index, c) in text.char_indices() {
            if !is_separator(c) {
                count += 1;
            }
            if count >= chars_before {
                approx = index;
                break;
            }
        }

        let from = floor_char_boundary(text, approx.saturating_sub(CONTEXT_BEFORE));
        let to = ceil_char_boundary(
            text,
            (approx + needle.len() + CONTEXT_AFTER_APPROXIMATE).min(text.len()),
        );
        let context = format!("{APPROXIMATE_TAG}{}", text[from..to].trim());
        if !out.contains(&context) {
            out.push(context);
        }
        if out.len() >= MAX_SNIPPETS {
            return true;
        }
        start = ceil_char_boundary(&normalized_text, pos + 1);
    }

    found
}

fn floor_char_boundary(value: &str, mut index: usize) -> usize {
    index = index.min(value.len());
    while index > 0 && !value.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(value: &str, mut index: usize) -> usize {
    index = index.min(value.len());
    while index < value.len() && !value.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use crate::pdftext::EngineFamily;

    use super::{match_identifier, MatchMethod, MAX_SNIPPETS};

    #[test]
    fn hyphenated_identifier_matches_exactly() {
        let result = match_identifier("NIP: 123-456-78-90", "1234567890");
        assert!(result.found);
        assert_eq!(result.method, MatchMethod::TextExtraction);
        assert!(!result.snippets.is_empty());
    }

    #[test]
    fn plain_identifier_matches_exactly() {
        let result = match_identifier("NIP 1234567890", "1234567890");
        assert!(result.found);
        assert_eq!(result.method, MatchMethod::TextExtraction);
    }

    #[test]
    fn different_identifier_does_not_match() {
        let result = match_identifier("NIP: 999-888-77-66", "1234567890");
        assert!(!result.found);
        assert_eq!(result.method, MatchMethod::NotFound);
    }

    #[test]
    fn separator_formatting_matches_through_normalization() {
        let result = match_identifier("Numer: 123 456 78/90 na fakturze", "1234567890");
        assert!(result.found);
        assert_eq!(result.method, MatchMethod::TextExtractionNormalized);
        assert_eq!(result.snippets.len(), 1);
        assert!(result.snippets[0].starts_with("[approximate match]"));
    }

    #[test]
    fn snippets_are_capped_and_deduplicated() {
        let mut text = String::new();
        for i in 0..100 {
            text.push_str(&format!("wiersz {i} zawiera NIP 1234567890 w tekście\n"));
        }

        let result = match_identifier(&text, "1234567890");
        assert!(result.found);
        assert_eq!(result.snippets.len(), MAX_SNIPPETS);

        let mut unique = result.snippets.clone();
        unique.dedup();
        assert_eq!(unique.len(), MAX_SNIPPETS);
    }

    #[test]
    fn repeated_identical_contexts_collapse_to_one_snippet() {
        // Short enough that every occurrence shares one clipped context.
        let text = "NIP 1234567890 ".repeat(3);
        let result = match_identifier(&text, "1234567890");
        assert!(result.found);
        assert_eq!(result.snippets.len(), 1);
    }

    #[test]
    fn short_identifiers_skip_the_fuzzy_pass() {
        // Whitespace stripping alone does not join "1-2-3", and the fuzzy
        // pass is reserved for identifiers longer than 3 characters.
        let result = match_identifier("kod 1-2-3", "123");
        assert!(!result.found);
    }

    #[test]
    fn ocr_family_relabels_method() {
        let result =
            match_identifier("NIP 1234567890", "1234567890").for_family(EngineFamily::Ocr);
        assert_eq!(result.method, MatchMethod::Ocr);

        let fuzzy = match_identifier("Numer: 123 456 78/90", "1234567890")
            .for_family(EngineFamily::Ocr);
        assert_eq!(fuzzy.method, MatchMethod::OcrNormalized);
    }

    #[test]
    fn snippets_respect_utf8_boundaries() {
        let text = "Sprzedawca: Łąka Żółta sp. z o.o. ąęćż NIP 1234567890 ściśle żółć";
        let result = match_identifier(text, "1234567890");
        assert!(result.found);
        assert!(!result.snippets.is_empty());
    }
}
