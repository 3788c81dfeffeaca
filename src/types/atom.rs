//! Atom types for the prompt kernel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an atom.
///
/// Implements `Ord` so that every tie-break in the pipeline can fall back
/// to ascending ID order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AtomId(String);

impl AtomId {
    /// Create a new AtomId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the ID is empty or whitespace-only (malformed).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AtomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AtomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AtomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Semantic category of an atom.
///
/// Known categories are emitted in [`Category::KNOWN_ORDER`]. Any other
/// value is kept verbatim as `Custom` and ordered by name after the known
/// ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    /// Who the agent is.
    Identity,
    /// How the agent works.
    Methodology,
    /// Tools available to the agent.
    Tooling,
    /// Hard rules and limits.
    Constraints,
    /// Task- or session-specific background.
    Context,
    /// Worked examples.
    Examples,
    /// Any category outside the known set.
    Custom(String),
}

impl Category {
    /// Fixed emission order of the known categories.
    pub const KNOWN_ORDER: [Category; 6] = [
        Category::Identity,
        Category::Methodology,
        Category::Tooling,
        Category::Constraints,
        Category::Context,
        Category::Examples,
    ];

    /// Parse a category from a string. Unknown names become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "identity" => Self::Identity,
            "methodology" => Self::Methodology,
            "tooling" => Self::Tooling,
            "constraints" => Self::Constraints,
            "context" => Self::Context,
            "examples" => Self::Examples,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Position in [`Category::KNOWN_ORDER`], or `None` for custom categories.
    pub fn known_rank(&self) -> Option<usize> {
        match self {
            Self::Identity => Some(0),
            Self::Methodology => Some(1),
            Self::Tooling => Some(2),
            Self::Constraints => Some(3),
            Self::Context => Some(4),
            Self::Examples => Some(5),
            Self::Custom(_) => None,
        }
    }

    /// Category name as written in atom sources.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identity => "identity",
            Self::Methodology => "methodology",
            Self::Tooling => "tooling",
            Self::Constraints => "constraints",
            Self::Context => "context",
            Self::Examples => "examples",
            Self::Custom(name) => name,
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Context
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable content fragment.
///
/// Atoms arrive from an [`AtomSource`](crate::source::AtomSource) and are
/// never mutated by the pipeline. `depends_on` may contain duplicates and
/// dangling references; both are tolerated by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    /// Unique atom identifier.
    pub id: AtomId,
    /// Semantic category.
    #[serde(default)]
    pub category: Category,
    /// IDs of atoms that must precede this one.
    #[serde(default)]
    pub depends_on: Vec<AtomId>,
    /// Estimated token cost.
    #[serde(default)]
    pub token_cost: u32,
    /// Retention priority under budget pressure (higher = keep).
    #[serde(default)]
    pub priority: i32,
    /// Opaque content text.
    #[serde(default)]
    pub content: String,
}

impl Atom {
    /// Create an atom with no dependencies, zero cost and empty content.
    pub fn new(id: impl Into<AtomId>, category: impl Into<Category>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            depends_on: Vec::new(),
            token_cost: 0,
            priority: 0,
            content: String::new(),
        }
    }

    /// Set the dependency list.
    pub fn with_deps<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AtomId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the token cost.
    pub fn with_cost(mut self, token_cost: u32) -> Self {
        self.token_cost = token_cost;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the content text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// An atom annotated with its position in the resolved dependency order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedAtom {
    /// The atom.
    pub atom: std::sync::Arc<Atom>,
    /// Index in the resolver's topological order.
    pub position: usize,
}

impl OrderedAtom {
    /// Shorthand for the atom's ID.
    pub fn id(&self) -> &AtomId {
        &self.atom.id
    }
}
