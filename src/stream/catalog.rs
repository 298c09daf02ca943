//! Signal catalog
//!
//! Ordered, duplicate-free registry mapping a signal's display name to its
//! vector index for one run. Rebuilt from the engine's vector metadata at
//! every run start; indices from a prior run are invalid and must not be
//! reused.

use std::collections::HashMap;

/// Name ↔ index mapping for the signals of a single run.
///
/// Lookups are case-insensitive; display casing and order are whatever the
/// engine reported first.
#[derive(Debug, Clone, Default)]
pub struct SignalCatalog {
    names: Vec<String>,
    index_by_key: HashMap<String, usize>,
    time_index: Option<usize>,
}

impl SignalCatalog {
    /// Build a catalog from engine-reported vector names, in order.
    /// Later case-insensitive duplicates are ignored.
    pub fn from_names(names: &[String]) -> Self {
        let mut catalog = Self::default();
        for name in names {
            let key = name.to_ascii_lowercase();
            if catalog.index_by_key.contains_key(&key) {
                continue;
            }
            let index = catalog.names.len();
            if catalog.time_index.is_none() && key == "time" {
                catalog.time_index = Some(index);
            }
            catalog.index_by_key.insert(key, index);
            catalog.names.push(name.clone());
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All display names, in vector order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Case-insensitive index lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index_by_key.get(&name.to_ascii_lowercase()).copied()
    }

    /// Index of the time axis, if the run reports one.
    pub fn time_index(&self) -> Option<usize> {
        self.time_index
    }

    /// Resolve requested names to indices, preserving request order.
    /// Unresolved names are silently ignored.
    pub fn resolve(&self, requested: &[String]) -> Vec<usize> {
        let mut indices = Vec::with_capacity(requested.len());
        for name in requested {
            if let Some(index) = self.index_of(name)
                && !indices.contains(&index)
            {
                indices.push(index);
            }
        }
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let catalog = SignalCatalog::from_names(&names(&["time", "v(in)", "v(out)"]));
        assert_eq!(catalog.index_of("V(IN)"), Some(1));
        assert_eq!(catalog.index_of("v(out)"), Some(2));
        assert_eq!(catalog.index_of("v(none)"), None);
        assert_eq!(catalog.time_index(), Some(0));
    }

    #[test]
    fn duplicate_names_keep_their_first_slot() {
        let catalog = SignalCatalog::from_names(&names(&["v(a)", "V(A)", "v(b)"]));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.name(0), Some("v(a)"));
        assert_eq!(catalog.index_of("v(b)"), Some(1));
    }

    #[test]
    fn resolve_ignores_unknown_names() {
        let catalog = SignalCatalog::from_names(&names(&["time", "v(in)", "v(out)"]));
        let resolved =
            catalog.resolve(&names(&["V(OUT)", "v(missing)", "v(in)", "v(out)"]));
        assert_eq!(resolved, vec![2, 1]);
    }
}
