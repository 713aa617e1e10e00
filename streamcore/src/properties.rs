//! Typed, round-trip-preserving property bag.
//!
//! PipeWire's C core takes a variadic, id-schema-decoded property list.
//! This crate re-models that as a plain string-keyed map with typed
//! accessors layered on top — `set_props` merges rather than replaces,
//! and unknown keys survive a `set_props`/`get_props` round trip
//! untouched.

use std::collections::BTreeMap;

/// Well-known property keys consumed by the core itself (the auto-link
/// policy in particular; see `module-autolink.c`'s `pipewire.target.node`
/// / `pipewire.autoconnect`).
pub const TARGET_NODE: &str = "target.node";
pub const AUTOCONNECT: &str = "autoconnect";
pub const MEDIA_TYPE: &str = "media.type";
pub const NODE_NAME: &str = "node.name";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Merge `other` into `self`, overwriting keys that already exist but
    /// leaving everything else untouched.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Truthy-as-PipeWire-sees-it: present and not "0"/"false"/empty.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(v) => !matches!(v, "0" | "false" | ""),
            None => false,
        }
    }

    /// Parsed as PipeWire's `atoi()` would: best-effort, 0 on failure.
    pub fn get_id(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_unknown_keys() {
        let mut base = Properties::new();
        base.set("custom.key", "value");

        let mut patch = Properties::new();
        patch.set(NODE_NAME, "mic-in");

        base.merge(&patch);

        assert_eq!(base.get("custom.key"), Some("value"));
        assert_eq!(base.get(NODE_NAME), Some("mic-in"));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut base = Properties::new();
        base.set(NODE_NAME, "old");
        let mut patch = Properties::new();
        patch.set(NODE_NAME, "new");
        base.merge(&patch);
        assert_eq!(base.get(NODE_NAME), Some("new"));
    }

    #[test]
    fn autoconnect_truthy_parsing() {
        let mut p = Properties::new();
        assert!(!p.get_bool(AUTOCONNECT));
        p.set(AUTOCONNECT, "1");
        assert!(p.get_bool(AUTOCONNECT));
        p.set(AUTOCONNECT, "0");
        assert!(!p.get_bool(AUTOCONNECT));
    }

    #[test]
    fn target_node_parses_as_id() {
        let mut p = Properties::new();
        p.set(TARGET_NODE, "42");
        assert_eq!(p.get_id(TARGET_NODE), Some(42));
    }
}
