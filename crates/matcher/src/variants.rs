/// Textual forms of a query submitted to the index, in search order: the
/// trimmed lowercase form first, then the trimmed original when it differs.
#[must_use]
pub fn query_variants(query: &str) -> Vec<String> {
    let original = query.trim();
    if original.is_empty() {
        return Vec::new();
    }
    let lowered = original.to_lowercase();
    if lowered == original {
        vec![lowered]
    } else {
        vec![lowered, original.to_string()]
    }
}
