//! Small helpers over `scraper` shared by the source adapters and the IR parser

use scraper::{ElementRef, Selector};

/// Parse a selector literal
///
/// Only used with compile-time constants, so a failure is a programming error.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {:?}: {:?}", css, e))
}

/// Visible text of an element: text nodes trimmed and joined with one space
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text with every whitespace run removed (for header matching)
pub(crate) fn compact_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}
