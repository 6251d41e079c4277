//! Capability registries and the synchronization pass.
//!
//! One registry per capability kind maps every exposed name to the
//! registration that says which backend owns it and what it was originally
//! called. Registries are rebuilt wholesale by [`RegistrySet::sync`] and
//! published with a single atomic swap (`arc-swap`), so list and call
//! handlers running on other tasks always observe one complete generation,
//! never a partially rebuilt map.
//!
//! # Collision Policy
//!
//! Within one sync pass backends are processed in the stable order the
//! host reports them; when two backends expose the same name, the last one
//! processed wins. This is deliberate, logged per collision, and kept
//! deterministic by the ordering contract on `BackendHost::snapshots`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::BackendSnapshot;
use crate::protocol::{CapabilityKind, Identity};

/// One exposed capability and its origin.
///
/// Created during a sync pass, replaced wholesale on the next one, never
/// mutated in place.
#[derive(Debug, Clone)]
pub struct CapabilityRegistration {
    /// The identifier a client sees (possibly prefixed)
    pub exposed_name: String,
    /// The backend that advertised this capability
    pub backend: String,
    /// Sanitized internal id of the backend; never shown to clients
    pub origin_key: String,
    /// The identifier the backend knows this capability by
    pub original_name: String,
    /// The full descriptor advertised to clients, with the identifying
    /// field rewritten to `exposed_name` when prefixed
    pub definition: Value,
}

/// One kind's registry: an ordered map from exposed name to registration.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, CapabilityRegistration>,
}

impl Registry {
    /// Resolve an exposed name.
    pub fn get(&self, exposed_name: &str) -> Option<&CapabilityRegistration> {
        self.entries.get(exposed_name)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no capability of this kind is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The advertised descriptors, in exposed-name order.
    pub fn definitions(&self) -> Vec<Value> {
        self.entries.values().map(|r| r.definition.clone()).collect()
    }

    /// Iterate registrations in exposed-name order.
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityRegistration> {
        self.entries.values()
    }
}

/// The four per-kind registries, each published via atomic swap.
pub struct RegistrySet {
    tools: ArcSwap<Registry>,
    resources: ArcSwap<Registry>,
    resource_templates: ArcSwap<Registry>,
    prompts: ArcSwap<Registry>,
}

impl Default for RegistrySet {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrySet {
    /// Create an empty registry set.
    pub fn new() -> Self {
        Self {
            tools: ArcSwap::new(Arc::new(Registry::default())),
            resources: ArcSwap::new(Arc::new(Registry::default())),
            resource_templates: ArcSwap::new(Arc::new(Registry::default())),
            prompts: ArcSwap::new(Arc::new(Registry::default())),
        }
    }

    fn slot(&self, kind: CapabilityKind) -> &ArcSwap<Registry> {
        match kind {
            CapabilityKind::Tools => &self.tools,
            CapabilityKind::Resources => &self.resources,
            CapabilityKind::ResourceTemplates => &self.resource_templates,
            CapabilityKind::Prompts => &self.prompts,
        }
    }

    /// Load the current generation of one kind's registry.
    pub fn load(&self, kind: CapabilityKind) -> Arc<Registry> {
        self.slot(kind).load_full()
    }

    /// Current registration count for one kind.
    pub fn size(&self, kind: CapabilityKind) -> usize {
        self.slot(kind).load().len()
    }

    /// Rebuild the requested registries from a fleet snapshot.
    ///
    /// Returns the kinds whose exposed key set changed (size or
    /// membership); unchanged kinds still get a fresh generation but
    /// produce no notification downstream.
    ///
    /// A backend contributes registrations only when it is connected,
    /// enabled, and does not report the hub's own identity (the
    /// self-reference guard that stops a client from pointing the hub at
    /// itself). A malformed catalog contributes nothing for its kind and
    /// never fails the pass.
    pub fn sync(
        &self,
        backends: &[BackendSnapshot],
        hub_identity: &Identity,
        kinds: &[CapabilityKind],
    ) -> Vec<CapabilityKind> {
        let index = safe_backend_index(backends, hub_identity);
        let mut changed = Vec::new();

        for &kind in kinds {
            let old_keys: BTreeSet<String> = self
                .slot(kind)
                .load()
                .entries
                .keys()
                .cloned()
                .collect();

            let mut next: BTreeMap<String, CapabilityRegistration> = BTreeMap::new();

            for (origin_key, snapshot) in &index {
                let catalog = snapshot.capabilities.of(kind);
                let Some(items) = catalog.as_array() else {
                    if !catalog.is_null() {
                        warn!(
                            backend = %snapshot.name,
                            kind = %kind,
                            "capability catalog is not an array; treating as empty"
                        );
                    }
                    continue;
                };

                for item in items {
                    let Some(original) = item.get(kind.uid_field()).and_then(Value::as_str)
                    else {
                        debug!(
                            backend = %snapshot.name,
                            kind = %kind,
                            "catalog entry missing '{}', skipping",
                            kind.uid_field()
                        );
                        continue;
                    };

                    let exposed = match (&snapshot.prefix, kind.prefixable()) {
                        (Some(prefix), true) => format!("{}_{}", prefix, original),
                        _ => original.to_string(),
                    };

                    let mut definition = item.clone();
                    if exposed != original {
                        if let Some(object) = definition.as_object_mut() {
                            object.insert(
                                kind.uid_field().to_string(),
                                Value::String(exposed.clone()),
                            );
                        }
                    }

                    let registration = CapabilityRegistration {
                        exposed_name: exposed.clone(),
                        backend: snapshot.name.clone(),
                        origin_key: origin_key.clone(),
                        original_name: original.to_string(),
                        definition,
                    };

                    if let Some(previous) = next.insert(exposed.clone(), registration) {
                        warn!(
                            kind = %kind,
                            exposed_name = %exposed,
                            winner = %snapshot.name,
                            shadowed = %previous.backend,
                            "capability name collision; last backend wins"
                        );
                    }
                }
            }

            let new_keys: BTreeSet<String> = next.keys().cloned().collect();
            if old_keys != new_keys {
                changed.push(kind);
            }

            self.slot(kind).store(Arc::new(Registry { entries: next }));
        }

        changed
    }
}

/// Build the safe backend index for a sync pass: eligible backends in their
/// stable reported order, each assigned a sanitized unique identifier used
/// only for internal namespacing.
fn safe_backend_index<'a>(
    backends: &'a [BackendSnapshot],
    hub_identity: &Identity,
) -> Vec<(String, &'a BackendSnapshot)> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut index = Vec::new();

    for snapshot in backends {
        if !snapshot.is_eligible() {
            continue;
        }
        if snapshot.identity.as_ref() == Some(hub_identity) {
            warn!(
                backend = %snapshot.name,
                "backend reports the hub's own identity; refusing to aggregate it"
            );
            continue;
        }

        let base = sanitize(&snapshot.name);
        let mut candidate = base.clone();
        let mut suffix = 0;
        while !taken.insert(candidate.clone()) {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        index.push((candidate, snapshot));
    }

    index
}

/// Replace every non-alphanumeric character with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendStatus, CapabilityLists};
    use serde_json::json;

    fn backend(name: &str, tools: Value) -> BackendSnapshot {
        BackendSnapshot {
            name: name.to_string(),
            status: BackendStatus::Connected,
            disabled: false,
            prefix: None,
            identity: Some(Identity {
                name: name.to_string(),
                version: "1.0.0".to_string(),
            }),
            capabilities: CapabilityLists {
                tools,
                ..Default::default()
            },
        }
    }

    fn hub() -> Identity {
        Identity::hub()
    }

    #[test]
    fn test_sync_registers_tools() {
        let set = RegistrySet::new();
        let backends = vec![backend(
            "b1",
            json!([{"name": "search", "description": "find things"}]),
        )];

        let changed = set.sync(&backends, &hub(), &CapabilityKind::ALL);
        assert_eq!(changed, vec![CapabilityKind::Tools]);

        let registry = set.load(CapabilityKind::Tools);
        let reg = registry.get("search").expect("registered");
        assert_eq!(reg.backend, "b1");
        assert_eq!(reg.original_name, "search");
        assert_eq!(reg.definition["description"], "find things");
    }

    #[test]
    fn test_last_backend_wins_on_collision() {
        let set = RegistrySet::new();
        let backends = vec![
            backend("b1", json!([{"name": "search"}])),
            backend("b2", json!([{"name": "search"}])),
        ];

        set.sync(&backends, &hub(), &CapabilityKind::ALL);

        let registry = set.load(CapabilityKind::Tools);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("search").expect("registered").backend, "b2");
    }

    #[test]
    fn test_prefix_applies_to_tools_only() {
        let set = RegistrySet::new();
        let mut b = backend("b2", json!([{"name": "search"}]));
        b.prefix = Some("secondary".to_string());
        b.capabilities.resources = json!([{"uri": "file:///data"}]);

        set.sync(&[b], &hub(), &CapabilityKind::ALL);

        let tools = set.load(CapabilityKind::Tools);
        let reg = tools.get("secondary_search").expect("prefixed tool");
        assert_eq!(reg.original_name, "search");
        // Definition advertised to clients carries the exposed name.
        assert_eq!(reg.definition["name"], "secondary_search");
        assert!(tools.get("search").is_none());

        // Resource URIs are never prefixed.
        let resources = set.load(CapabilityKind::Resources);
        assert!(resources.get("file:///data").is_some());
    }

    #[test]
    fn test_disabled_and_disconnected_contribute_nothing() {
        let set = RegistrySet::new();
        let mut disabled = backend("b1", json!([{"name": "a"}]));
        disabled.disabled = true;
        let mut disconnected = backend("b2", json!([{"name": "b"}]));
        disconnected.status = BackendStatus::Disconnected;
        let mut errored = backend("b3", json!([{"name": "c"}]));
        errored.status = BackendStatus::Error;

        let changed = set.sync(
            &[disabled, disconnected, errored],
            &hub(),
            &CapabilityKind::ALL,
        );

        assert!(changed.is_empty());
        for kind in CapabilityKind::ALL {
            assert_eq!(set.size(kind), 0);
        }
    }

    #[test]
    fn test_self_reference_guard() {
        let set = RegistrySet::new();
        let mut selfish = backend("mirror", json!([{"name": "loop"}]));
        selfish.identity = Some(Identity::hub());

        set.sync(&[selfish], &hub(), &CapabilityKind::ALL);

        assert_eq!(set.size(CapabilityKind::Tools), 0);
    }

    #[test]
    fn test_malformed_catalog_is_not_fatal() {
        let set = RegistrySet::new();
        let malformed = backend("bad", json!({"oops": "not an array"}));
        let good = backend("good", json!([{"name": "works"}]));

        let changed = set.sync(&[malformed, good], &hub(), &CapabilityKind::ALL);

        assert_eq!(changed, vec![CapabilityKind::Tools]);
        let registry = set.load(CapabilityKind::Tools);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("works").is_some());
    }

    #[test]
    fn test_entries_missing_uid_field_are_skipped() {
        let set = RegistrySet::new();
        let b = backend(
            "b1",
            json!([{"description": "nameless"}, {"name": "named"}]),
        );

        set.sync(&[b], &hub(), &CapabilityKind::ALL);

        let registry = set.load(CapabilityKind::Tools);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("named").is_some());
    }

    #[test]
    fn test_no_change_reports_no_changed_kinds() {
        let set = RegistrySet::new();
        let backends = vec![backend("b1", json!([{"name": "search"}]))];

        let first = set.sync(&backends, &hub(), &CapabilityKind::ALL);
        assert_eq!(first, vec![CapabilityKind::Tools]);

        // Same fleet again: key set identical, nothing reported changed.
        let second = set.sync(&backends, &hub(), &CapabilityKind::ALL);
        assert!(second.is_empty());
    }

    #[test]
    fn test_removal_is_a_change() {
        let set = RegistrySet::new();
        set.sync(
            &[backend("b1", json!([{"name": "search"}]))],
            &hub(),
            &CapabilityKind::ALL,
        );

        let changed = set.sync(&[], &hub(), &CapabilityKind::ALL);
        assert_eq!(changed, vec![CapabilityKind::Tools]);
        assert_eq!(set.size(CapabilityKind::Tools), 0);
    }

    #[test]
    fn test_sync_subset_of_kinds() {
        let set = RegistrySet::new();
        let mut b = backend("b1", json!([{"name": "t"}]));
        b.capabilities.prompts = json!([{"name": "p"}]);

        let changed = set.sync(&[b], &hub(), &[CapabilityKind::Prompts]);

        assert_eq!(changed, vec![CapabilityKind::Prompts]);
        // Tools were not requested, so that registry stays empty.
        assert_eq!(set.size(CapabilityKind::Tools), 0);
        assert_eq!(set.size(CapabilityKind::Prompts), 1);
    }

    #[test]
    fn test_sanitize_and_collision_suffix() {
        assert_eq!(sanitize("my-server.v2"), "my_server_v2");

        let backends = vec![
            backend("srv-a", json!([])),
            backend("srv.a", json!([])),
            backend("srv a", json!([])),
        ];
        let index = safe_backend_index(&backends, &hub());
        let keys: Vec<_> = index.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["srv_a", "srv_a_1", "srv_a_2"]);
    }

    #[test]
    fn test_definitions_in_stable_order() {
        let set = RegistrySet::new();
        let b = backend("b1", json!([{"name": "zeta"}, {"name": "alpha"}]));

        set.sync(&[b], &hub(), &CapabilityKind::ALL);

        let defs = set.load(CapabilityKind::Tools).definitions();
        let names: Vec<_> = defs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
