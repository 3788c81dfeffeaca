//! Deterministic category structuring.
//!
//! Known categories are emitted in [`Category::KNOWN_ORDER`]; custom
//! categories follow, sorted by name. Within a group the resolved
//! dependency order is preserved.
//!
//! Grouping never breaks dependency order: an atom whose dependency sits in
//! a later group is placed in that later group.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{AtomId, Category, OrderedAtom};

/// One category group in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    /// Group category.
    pub category: Category,
    /// Atoms emitted in this group, in order.
    pub atoms: Vec<AtomId>,
}

/// Output of [`plan`]: the sorted sequence and its group boundaries.
#[derive(Debug, Clone, Default)]
pub struct CategoryPlan {
    /// Atoms in category order.
    pub sorted: Vec<OrderedAtom>,
    /// Groups covering `sorted`, in order.
    pub groups: Vec<CategoryGroup>,
}

/// Group resolved atoms by category.
///
/// Same input, same output, on every run and every process.
pub fn sort_by_category(ordered: Vec<OrderedAtom>) -> Vec<OrderedAtom> {
    plan(ordered).sorted
}

/// Group resolved atoms by category and report the groups.
pub fn plan(ordered: Vec<OrderedAtom>) -> CategoryPlan {
    let known = Category::KNOWN_ORDER.len();
    let custom_names: Vec<&str> = ordered
        .iter()
        .filter_map(|o| match &o.atom.category {
            Category::Custom(name) => Some(name.as_str()),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let group_of = |category: &Category| -> usize {
        match category {
            Category::Custom(name) => known + custom_names.binary_search(&name.as_str()).unwrap_or(0),
            other => other.known_rank().unwrap_or(known),
        }
    };

    // Input is topologically ordered, so dependencies are assigned first.
    let mut effective: HashMap<&str, usize> = HashMap::with_capacity(ordered.len());
    let mut keyed: Vec<(usize, &OrderedAtom)> = Vec::with_capacity(ordered.len());
    for o in &ordered {
        let own = group_of(&o.atom.category);
        let group = o
            .atom
            .depends_on
            .iter()
            .filter_map(|dep| effective.get(dep.as_str()).copied())
            .fold(own, usize::max);
        effective.insert(o.id().as_str(), group);
        keyed.push((group, o));
    }
    // Stable: equal groups keep resolved order.
    keyed.sort_by_key(|(group, _)| *group);

    let mut groups: Vec<CategoryGroup> = Vec::new();
    let mut last_group = usize::MAX;
    for (group, o) in &keyed {
        if *group != last_group {
            let category = if *group < known {
                Category::KNOWN_ORDER[*group].clone()
            } else {
                Category::Custom(custom_names[*group - known].to_string())
            };
            groups.push(CategoryGroup { category, atoms: Vec::new() });
            last_group = *group;
        }
        if let Some(g) = groups.last_mut() {
            g.atoms.push(o.id().clone());
        }
    }

    let sorted = keyed.into_iter().map(|(_, o)| o.clone()).collect();
    CategoryPlan { sorted, groups }
}
