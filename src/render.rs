//! Deterministic prompt rendering.
//!
//! ## Canonical Text
//!
//! Each atom's content is normalized before rendering:
//!
//! ```text
//! normalize(text) = trim(normalize_newlines(text))
//! ```
//!
//! where `normalize_newlines` maps CRLF and lone CR to LF. Normalized blocks
//! are joined with a blank line; empty blocks are skipped. The rendered
//! prompt's `content_hash` is `SHA256(normalize(rendered))` as lowercase hex.

use sha2::{Digest, Sha256};

use crate::types::{Category, OrderedAtom};

/// Normalize text to canonical form.
///
/// ```rust
/// use prompt_kernel::render::normalize_text;
///
/// assert_eq!(normalize_text("  Hello\r\nWorld  "), "Hello\nWorld");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// SHA-256 of the canonical text, as 64 lowercase hex chars.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a content hash in constant time.
pub fn verify_content_hash(text: &str, expected_hash: &str) -> bool {
    let computed = compute_content_hash(text);
    if computed.len() != expected_hash.len() {
        return false;
    }
    computed
        .bytes()
        .zip(expected_hash.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Renders selected atoms into the final prompt text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptRenderer {
    /// Emit a `## category` header whenever the category changes.
    pub section_headers: bool,
}

impl PromptRenderer {
    /// Create a renderer.
    pub fn new(section_headers: bool) -> Self {
        Self { section_headers }
    }

    /// Render atoms in the given order.
    pub fn render(&self, atoms: &[OrderedAtom]) -> String {
        let mut blocks: Vec<String> = Vec::with_capacity(atoms.len());
        let mut current: Option<&Category> = None;

        for o in atoms {
            let body = normalize_text(&o.atom.content);
            if body.is_empty() {
                continue;
            }
            if self.section_headers && current != Some(&o.atom.category) {
                blocks.push(format!("## {}", o.atom.category));
                current = Some(&o.atom.category);
            }
            blocks.push(body);
        }

        blocks.join("\n\n")
    }
}
