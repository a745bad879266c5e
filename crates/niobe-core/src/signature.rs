//! Error signatures: message fingerprints that group similar errors.
//!
//! [`normalize`] replaces the variable parts of a message (paths, addresses,
//! ports, ids, numbers) with placeholders so that
//! `connection refused to 10.0.0.3:5432` and
//! `connection refused to 10.0.0.9:5432` share the signature
//! `connection refused to <ip>:<port>`.

use std::sync::LazyLock;

use regex::Regex;

/// Longest signature kept, in characters.
pub const MAX_SIGNATURE_LEN: usize = 200;

/// Substitutions applied in order. Earlier patterns are more specific and
/// must run before the generic number rule. Paths go first so that ids
/// inside them collapse with the path.
static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Absolute paths of two or more segments, standing on their own.
        (r#"(^|[\s"'=(\[])/[\w.\-]+(?:/[\w.\-]+)+/?"#, "${1}<path>"),
        (
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
            "<uuid>",
        ),
        (r"\b(?:\d{1,3}\.){3}\d{1,3}:\d{1,5}\b", "<ip>:<port>"),
        (r"\b(?:\d{1,3}\.){3}\d{1,3}\b", "<ip>"),
        (r"\b0x[0-9a-fA-F]+\b", "<hex>"),
        (r"\b[0-9a-fA-F]*\d[0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*\b", "<id>"),
        (r"\b[0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*\d[0-9a-fA-F]*\b", "<id>"),
        (r"\d+(?:\.\d+)?", "<num>"),
        (r"\s+", " "),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("signature regex is valid"),
            replacement,
        )
    })
    .collect()
});

/// Compute the signature of `message`. Pure and deterministic.
pub fn normalize(message: &str) -> String {
    let mut out = message.trim().to_string();
    for (re, replacement) in RULES.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    let out = out.trim();
    match out.char_indices().nth(MAX_SIGNATURE_LEN) {
        Some((idx, _)) => out[..idx].to_string(),
        None => out.to_string(),
    }
}
