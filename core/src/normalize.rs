use unicode_normalization::UnicodeNormalization;

/// Comparison key for genre/author matching: NFKC-folded, trimmed and
/// lowercased. Stored values and queries go through the same folding, so
/// ingestion-time [`clean_text`] never changes what matches.
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_lowercase()
}

/// Ingestion-time cleanup of a text field: NFKC normalization and trimming.
/// Case is preserved.
pub fn clean_text(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_string()
}
