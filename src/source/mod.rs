//! Atom sources.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{Atom, CompilationContext};

/// Supplies candidate atoms for a compilation.
///
/// Deciding *which* atoms are candidates is the source's business; the
/// compiler never mutates or persists what it returns.
#[async_trait]
pub trait AtomSource: Send + Sync {
    /// Error type for source operations.
    type Error: std::error::Error + Send + Sync;

    /// Candidate atoms for a context.
    async fn candidate_atoms(&self, context: &CompilationContext) -> Result<Vec<Arc<Atom>>, Self::Error>;
}

/// Parse a JSON array of atoms leniently.
///
/// Entries that are `null` or do not parse as an atom become `None` so that
/// the pipeline can report them instead of rejecting the whole document.
pub fn parse_atom_list(json: &str) -> Result<Vec<Option<Atom>>, serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    Ok(values
        .into_iter()
        .map(|v| serde_json::from_value::<Atom>(v).ok())
        .collect())
}

pub use memory::InMemoryAtomSource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_atom_list_lenient() {
        let json = r#"[
            {"id": "a", "category": "identity", "token_cost": 5},
            null,
            {"category": "tooling"},
            42,
            {"id": "b", "depends_on": ["a"]}
        ]"#;
        let atoms = parse_atom_list(json).unwrap();
        assert_eq!(atoms.len(), 5);
        assert!(atoms[0].is_some());
        assert!(atoms[1].is_none());
        assert!(atoms[2].is_none());
        assert!(atoms[3].is_none());
        assert_eq!(atoms[4].as_ref().unwrap().depends_on[0].as_str(), "a");
    }

    #[test]
    fn test_parse_atom_list_rejects_non_array() {
        assert!(parse_atom_list(r#"{"id": "a"}"#).is_err());
    }
}
