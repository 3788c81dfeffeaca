//! In-memory atom source.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use async_trait::async_trait;

use crate::types::{Atom, AtomId, CompilationContext};
use super::AtomSource;

/// In-memory atom source.
///
/// Uses BTreeMap for deterministic iteration order. Shared atoms are
/// candidates for every context; shard atoms only for contexts with that
/// shard, and shadow a shared atom with the same ID.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAtomSource {
    /// Atoms visible to every shard.
    shared: BTreeMap<AtomId, Arc<Atom>>,
    /// Shard -> atoms visible only to that shard.
    by_shard: BTreeMap<String, BTreeMap<AtomId, Arc<Atom>>>,
}

impl InMemoryAtomSource {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source whose atoms are all shared.
    pub fn from_atoms<I: IntoIterator<Item = Atom>>(atoms: I) -> Self {
        let mut source = Self::new();
        for atom in atoms {
            source.add_atom(atom);
        }
        source
    }

    /// Add an atom visible to every shard. Replaces an atom with the same ID.
    pub fn add_atom(&mut self, atom: Atom) {
        self.shared.insert(atom.id.clone(), Arc::new(atom));
    }

    /// Add an atom visible only to `shard`.
    pub fn add_shard_atom(&mut self, shard: impl Into<String>, atom: Atom) {
        self.by_shard
            .entry(shard.into())
            .or_default()
            .insert(atom.id.clone(), Arc::new(atom));
    }

    /// Number of atoms across all scopes.
    pub fn num_atoms(&self) -> usize {
        self.shared.len() + self.by_shard.values().map(BTreeMap::len).sum::<usize>()
    }
}

#[async_trait]
impl AtomSource for InMemoryAtomSource {
    type Error = Infallible;

    async fn candidate_atoms(&self, context: &CompilationContext) -> Result<Vec<Arc<Atom>>, Self::Error> {
        let mut merged: BTreeMap<&AtomId, &Arc<Atom>> = self.shared.iter().collect();
        if let Some(shard_atoms) = self.by_shard.get(&context.shard) {
            merged.extend(shard_atoms.iter());
        }
        Ok(merged.into_values().cloned().collect())
    }
}
