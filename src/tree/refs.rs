use std::collections::{BTreeMap, HashMap};

/// Synthetic reference names ("{Type}Ref{N}") assigned per type in
/// first-sight order. Numbering starts at 1 and a given (type, id) pair
/// keeps its first assignment forever.
#[derive(Debug, Default)]
pub struct ReferenceMap {
    refs: BTreeMap<String, HashMap<String, String>>,
    counters: BTreeMap<String, usize>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (or return the already-assigned) reference for a record id.
    pub fn assign(&mut self, sobject: &str, id: &str) -> String {
        if let Some(existing) = self.refs.get(sobject).and_then(|m| m.get(id)) {
            return existing.clone();
        }
        let reference = self.next_reference(sobject);
        self.refs
            .entry(sobject.to_string())
            .or_default()
            .insert(id.to_string(), reference.clone());
        reference
    }

    /// Mint a reference for a record with no id of its own. Nothing can look
    /// it up later, but the record still needs a referenceId to key save
    /// results.
    pub fn mint(&mut self, sobject: &str) -> String {
        self.next_reference(sobject)
    }

    fn next_reference(&mut self, sobject: &str) -> String {
        let counter = self.counters.entry(sobject.to_string()).or_insert(0);
        *counter += 1;
        format!("{sobject}Ref{counter}")
    }

    pub fn lookup(&self, sobject: &str, id: &str) -> Option<&str> {
        self.refs.get(sobject)?.get(id).map(String::as_str)
    }

    /// Search every type's sub-map, for polymorphic lookups where field
    /// metadata does not pin the target type.
    pub fn lookup_any(&self, id: &str) -> Option<&str> {
        self.refs
            .values()
            .find_map(|m| m.get(id))
            .map(String::as_str)
    }
}
