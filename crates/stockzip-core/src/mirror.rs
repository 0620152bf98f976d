//! # Local Mirror
//!
//! Optimistic, in-memory view of server entities keyed by id, with secondary
//! indexes for scanner lookups.
//!
//! ## Index Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          LocalMirror                                    │
//! │                                                                         │
//! │   barcode_index            sku_index              entities              │
//! │  ┌──────────────┐        ┌──────────────┐       ┌─────────────────────┐ │
//! │  │ 123456 → i-1 │        │ LAP-001→ i-1 │       │ i-1 → {name, qty..} │ │
//! │  │ 999000 → i-2 │        └──────────────┘       │ i-2 → {...}         │ │
//! │  └──────────────┘                               └─────────────────────┘ │
//! │                                                                         │
//! │  lookup_by_secondary_key("LAP-001")                                    │
//! │    1. barcode_index  → miss                                            │
//! │    2. sku_index      → i-1  ──► entities[i-1]                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariant
//! Every index entry points at an id present in `entities`. Entries belonging
//! to a replaced, patched or removed entity are dropped before the new values
//! are indexed. When two entities share a key, the key stays resolvable as
//! long as either of them is cached.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{CachedEntity, FieldMap};

// =============================================================================
// Secondary Keys
// =============================================================================

/// Secondary identifier schemes, in lookup priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecondaryKey {
    Barcode,
    Sku,
}

impl SecondaryKey {
    /// Lookup order used by `lookup_by_secondary_key`.
    pub const LOOKUP_ORDER: [SecondaryKey; 2] = [SecondaryKey::Barcode, SecondaryKey::Sku];

    /// Entity field holding this key.
    pub fn field_name(&self) -> &'static str {
        match self {
            SecondaryKey::Barcode => "barcode",
            SecondaryKey::Sku => "sku",
        }
    }
}

// =============================================================================
// Local Mirror
// =============================================================================

/// Optimistic read cache of server entities.
#[derive(Debug, Clone, Default)]
pub struct LocalMirror {
    entities: HashMap<String, CachedEntity>,
    indexes: HashMap<SecondaryKey, HashMap<String, String>>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entity by primary id and re-indexes it.
    pub fn upsert(&mut self, entity: CachedEntity) {
        if let Some(old) = self.entities.remove(&entity.id) {
            self.unindex(&old);
        }
        self.index(&entity);
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Looks an entity up by primary id.
    pub fn lookup_by_primary_id(&self, id: &str) -> Option<&CachedEntity> {
        self.entities.get(id)
    }

    /// Looks an entity up by barcode, then by SKU.
    pub fn lookup_by_secondary_key(&self, key: &str) -> Option<&CachedEntity> {
        SecondaryKey::LOOKUP_ORDER.iter().find_map(|scheme| {
            self.indexes
                .get(scheme)
                .and_then(|index| index.get(key))
                .and_then(|id| self.entities.get(id))
        })
    }

    /// Adds `delta` to a numeric field in place.
    ///
    /// Returns false when the id is not cached. A missing or non-numeric field
    /// is treated as zero.
    pub fn adjust_numeric_field(&mut self, id: &str, field: &str, delta: i64) -> bool {
        self.modify(id, |entity| {
            let adjusted = match entity.fields.get(field) {
                Some(Value::Number(n)) if n.is_i64() => {
                    Value::from(n.as_i64().unwrap_or_default().saturating_add(delta))
                }
                Some(Value::Number(n)) => {
                    Value::from(n.as_f64().unwrap_or_default() + delta as f64)
                }
                _ => Value::from(delta),
            };
            entity.fields.insert(field.to_string(), adjusted);
        })
    }

    /// Shallow-merges `patch` into a cached entity.
    ///
    /// Returns false when the id is not cached. An `id` key in the patch is
    /// ignored; the primary id never changes through a patch.
    pub fn patch(&mut self, id: &str, patch: &FieldMap) -> bool {
        self.modify(id, |entity| {
            for (key, value) in patch {
                if key != "id" {
                    entity.fields.insert(key.clone(), value.clone());
                }
            }
        })
    }

    /// Removes an entity and its index entries.
    pub fn remove(&mut self, id: &str) -> Option<CachedEntity> {
        let entity = self.entities.remove(id)?;
        self.unindex(&entity);
        Some(entity)
    }

    /// Empties primary storage and every index.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.indexes.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Snapshot of every cached entity, ordered by id.
    pub fn entities(&self) -> Vec<CachedEntity> {
        let mut all: Vec<CachedEntity> = self.entities.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    // =========================================================================
    // Index Maintenance
    // =========================================================================

    fn modify(&mut self, id: &str, f: impl FnOnce(&mut CachedEntity)) -> bool {
        let Some(mut entity) = self.entities.remove(id) else {
            return false;
        };
        self.unindex(&entity);
        f(&mut entity);
        self.index(&entity);
        self.entities.insert(entity.id.clone(), entity);
        true
    }

    fn index(&mut self, entity: &CachedEntity) {
        for scheme in SecondaryKey::LOOKUP_ORDER {
            if let Some(key) = entity.str_field(scheme.field_name()) {
                if !key.is_empty() {
                    self.indexes
                        .entry(scheme)
                        .or_default()
                        .insert(key.to_string(), entity.id.clone());
                }
            }
        }
    }

    /// Drops the entries `entity` owns. `entity` must already be out of
    /// `entities`. A key another cached entity also carries is handed to it
    /// (lowest id first) instead of being dropped.
    fn unindex(&mut self, entity: &CachedEntity) {
        for scheme in SecondaryKey::LOOKUP_ORDER {
            let field = scheme.field_name();
            let Some(key) = entity.str_field(field) else {
                continue;
            };
            // Another entity may have claimed the key since.
            let owned = self
                .indexes
                .get(&scheme)
                .and_then(|index| index.get(key))
                .is_some_and(|owner| *owner == entity.id);
            if !owned {
                continue;
            }

            let successor = self
                .entities
                .values()
                .filter(|other| other.str_field(field) == Some(key))
                .map(|other| other.id.clone())
                .min();

            if let Some(index) = self.indexes.get_mut(&scheme) {
                match successor {
                    Some(id) => {
                        index.insert(key.to_string(), id);
                    }
                    None => {
                        index.remove(key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;
    use serde_json::json;

    fn item(id: &str, sku: Option<&str>, barcode: Option<&str>, quantity: i64) -> CachedEntity {
        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!("Laptop"));
        fields.insert("sku".into(), json!(sku));
        fields.insert("barcode".into(), json!(barcode));
        fields.insert("quantity".into(), json!(quantity));
        CachedEntity::new(id, EntityType::Item, fields)
    }

    fn dangling_entries(mirror: &LocalMirror) -> usize {
        mirror
            .indexes
            .values()
            .flat_map(|index| index.values())
            .filter(|id| !mirror.entities.contains_key(*id))
            .count()
    }

    #[test]
    fn test_lookup_by_barcode() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("LAP-001"), Some("123456789"), 50));

        let found = mirror.lookup_by_secondary_key("123456789").unwrap();
        assert_eq!(found.str_field("name"), Some("Laptop"));
    }

    #[test]
    fn test_lookup_by_sku() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("LAP-001"), None, 50));

        let found = mirror.lookup_by_secondary_key("LAP-001").unwrap();
        assert_eq!(found.id, "item-1");
    }

    #[test]
    fn test_barcode_wins_over_sku() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("by-sku", Some("SHARED"), None, 1));
        mirror.upsert(item("by-barcode", None, Some("SHARED"), 1));

        assert_eq!(mirror.lookup_by_secondary_key("SHARED").unwrap().id, "by-barcode");
    }

    #[test]
    fn test_lookup_misses() {
        let mut mirror = LocalMirror::new();
        assert!(mirror.lookup_by_secondary_key("nonexistent").is_none());
        assert!(mirror.lookup_by_primary_id("nonexistent-id").is_none());

        mirror.upsert(item("item-uuid-123", Some("LAP-001"), None, 50));
        assert!(mirror.lookup_by_primary_id("item-uuid-123").is_some());
    }

    #[test]
    fn test_adjust_numeric_field() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("LAP-001"), Some("123456"), 50));

        assert!(mirror.adjust_numeric_field("item-1", "quantity", -5));
        assert_eq!(mirror.lookup_by_primary_id("item-1").unwrap().i64_field("quantity"), Some(45));

        assert!(mirror.adjust_numeric_field("item-1", "reserved", 2));
        assert_eq!(mirror.lookup_by_primary_id("item-1").unwrap().i64_field("reserved"), Some(2));

        assert!(!mirror.adjust_numeric_field("missing", "quantity", 1));
    }

    #[test]
    fn test_reindex_on_upsert_drops_stale_keys() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("OLD-SKU"), Some("111"), 1));
        mirror.upsert(item("item-1", Some("NEW-SKU"), Some("222"), 1));

        assert!(mirror.lookup_by_secondary_key("OLD-SKU").is_none());
        assert!(mirror.lookup_by_secondary_key("111").is_none());
        assert_eq!(mirror.lookup_by_secondary_key("NEW-SKU").unwrap().id, "item-1");
        assert_eq!(dangling_entries(&mirror), 0);
    }

    #[test]
    fn test_patch_reindexes_and_keeps_id() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("LAP-001"), None, 1));

        let mut patch = FieldMap::new();
        patch.insert("sku".into(), json!("LAP-002"));
        patch.insert("id".into(), json!("hijacked"));
        assert!(mirror.patch("item-1", &patch));

        assert!(mirror.lookup_by_secondary_key("LAP-001").is_none());
        let entity = mirror.lookup_by_secondary_key("LAP-002").unwrap();
        assert_eq!(entity.id, "item-1");
        assert!(entity.field("id").is_none());
    }

    #[test]
    fn test_remove_keeps_other_owner_of_key() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("DUP"), None, 1));
        mirror.upsert(item("item-2", Some("DUP"), None, 1));

        mirror.remove("item-1");
        assert_eq!(mirror.lookup_by_secondary_key("DUP").unwrap().id, "item-2");

        mirror.remove("item-2");
        assert!(mirror.lookup_by_secondary_key("DUP").is_none());
        assert_eq!(dangling_entries(&mirror), 0);
    }

    #[test]
    fn test_shared_barcode_survives_owner_leaving() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", None, Some("SHARED"), 1));
        mirror.upsert(item("item-2", None, Some("SHARED"), 1));
        assert_eq!(mirror.lookup_by_secondary_key("SHARED").unwrap().id, "item-2");

        mirror.remove("item-2");
        assert_eq!(mirror.lookup_by_secondary_key("SHARED").unwrap().id, "item-1");

        mirror.upsert(item("item-3", None, Some("SHARED"), 1));
        let mut patch = FieldMap::new();
        patch.insert("barcode".into(), json!("OTHER"));
        assert!(mirror.patch("item-3", &patch));

        assert_eq!(mirror.lookup_by_secondary_key("SHARED").unwrap().id, "item-1");
        assert_eq!(mirror.lookup_by_secondary_key("OTHER").unwrap().id, "item-3");
        assert_eq!(dangling_entries(&mirror), 0);
    }

    #[test]
    fn test_clear_empties_indexes() {
        let mut mirror = LocalMirror::new();
        mirror.upsert(item("item-1", Some("LAP-001"), Some("123"), 1));
        mirror.clear();

        assert!(mirror.is_empty());
        assert!(mirror.lookup_by_secondary_key("123").is_none());
        assert!(mirror.lookup_by_secondary_key("LAP-001").is_none());
    }
}
