//! Generic record store over a [`CollectionBackend`].

use super::backend::{CollectionBackend, JsonFileBackend};
use crate::models::{Item, Record};
use crate::{Result, WardrobeError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// One entry of a leniently loaded collection.
#[derive(Debug, Clone)]
pub enum LoadedRecord<R> {
    Valid(R),
    /// The raw record did not deserialize into `R`.
    Malformed {
        index: usize,
        id: Option<String>,
        reason: String,
    },
}

impl<R> LoadedRecord<R> {
    pub fn into_result(self) -> Result<R> {
        match self {
            LoadedRecord::Valid(record) => Ok(record),
            LoadedRecord::Malformed { index, id, reason } => Err(WardrobeError::validation(
                "record",
                format!(
                    "record {} at position {} is malformed: {}",
                    id.as_deref().unwrap_or("<no id>"),
                    index,
                    reason
                ),
            )),
        }
    }
}

/// Ordered collection of `R` records with read-modify-write semantics.
///
/// Every mutation loads the whole collection, changes it and saves it back.
/// Concurrent writers from separate processes are serialized only by the
/// backend's own locking; the last writer wins.
pub struct MetadataStore<R: Record> {
    backend: Arc<dyn CollectionBackend>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for MetadataStore<R> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R: Record> MetadataStore<R> {
    pub fn new(backend: Arc<dyn CollectionBackend>) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    /// Store backed by a local JSON file.
    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileBackend::new(path)))
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// All records in insertion order. Malformed records are skipped with a warning.
    pub fn load(&self) -> Result<Vec<R>> {
        let mut records = Vec::new();
        for entry in self.load_lenient()? {
            match entry {
                LoadedRecord::Valid(record) => records.push(record),
                LoadedRecord::Malformed { index, id, reason } => warn!(
                    "Skipping malformed {} record {} at position {}: {}",
                    R::COLLECTION,
                    id.as_deref().unwrap_or("<no id>"),
                    index,
                    reason
                ),
            }
        }
        Ok(records)
    }

    /// All records in insertion order, keeping malformed ones as errors in place.
    pub fn load_lenient(&self) -> Result<Vec<LoadedRecord<R>>> {
        let raw = self.backend.load_raw()?;
        debug!(
            "Loaded {} raw {} records from {}",
            raw.len(),
            R::COLLECTION,
            self.backend.describe()
        );

        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let id = value.get("id").and_then(Value::as_str).map(String::from);
                match serde_json::from_value::<R>(value) {
                    Ok(record) => LoadedRecord::Valid(record),
                    Err(e) => LoadedRecord::Malformed {
                        index,
                        id,
                        reason: e.to_string(),
                    },
                }
            })
            .collect())
    }

    /// Replace the entire collection.
    pub fn save(&self, records: &[R]) -> Result<()> {
        let raw = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.backend.save_raw(&raw)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<R>> {
        Ok(self.load()?.into_iter().find(|r| r.id() == id))
    }

    /// Record with the given ID, or `NotFound`.
    pub fn get_by_id(&self, id: &str) -> Result<R> {
        self.find_by_id(id)?
            .ok_or_else(|| WardrobeError::not_found(R::COLLECTION, id))
    }

    /// The last `n` records in insertion order.
    pub fn get_recent(&self, n: usize) -> Result<Vec<R>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut records = self.load()?;
        let start = records.len().saturating_sub(n);
        Ok(records.split_off(start))
    }

    /// Records whose `field` equals `value`, or whose `field` is a sequence
    /// containing `value`.
    ///
    /// `field` may be a dotted path into nested objects, e.g. `details.color`.
    pub fn get_by_field_value(&self, field: &str, value: &Value) -> Result<Vec<R>> {
        let mut matches = Vec::new();
        for record in self.load()? {
            let raw = serde_json::to_value(&record)?;
            if field_matches(lookup_field(&raw, field), value) {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    /// Distinct values of `field` in first-seen order, flattening sequences.
    pub fn get_unique_values(&self, field: &str) -> Result<Vec<Value>> {
        let mut unique: Vec<Value> = Vec::new();
        for record in self.load()? {
            let raw = serde_json::to_value(&record)?;
            let candidates = match lookup_field(&raw, field) {
                Some(Value::Array(values)) => values.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => vec![other.clone()],
            };
            for candidate in candidates {
                if !unique.contains(&candidate) {
                    unique.push(candidate);
                }
            }
        }
        Ok(unique)
    }

    /// Remove the record with `id`. Returns false if it was absent.
    ///
    /// No cascading: records referencing `id` elsewhere are left alone.
    /// Other raw records, malformed ones included, are written back as read.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut raw = self.backend.load_raw()?;
        let before = raw.len();
        raw.retain(|value| raw_id(value) != Some(id));
        if raw.len() == before {
            return Ok(false);
        }
        self.backend.save_raw(&raw)?;
        debug!("Deleted {} record {}", R::COLLECTION, id);
        Ok(true)
    }

    /// Remove any record with the same ID, then append `record`.
    pub fn upsert(&self, record: R) -> Result<()> {
        let mut raw = self.backend.load_raw()?;
        raw.retain(|value| raw_id(value) != Some(record.id()));
        raw.push(serde_json::to_value(&record)?);
        self.backend.save_raw(&raw)
    }
}

impl MetadataStore<Item> {
    /// Sorted unique non-empty categories.
    pub fn categories(&self) -> Result<Vec<String>> {
        let mut categories: Vec<String> = self
            .load()?
            .iter()
            .filter_map(|item| item.effective_category().map(String::from))
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Items grouped by category, insertion order kept inside each group.
    pub fn grouped_by_category(&self) -> Result<BTreeMap<String, Vec<Item>>> {
        let mut grouped: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in self.load()? {
            if let Some(category) = item.effective_category().map(String::from) {
                grouped.entry(category).or_default().push(item);
            }
        }
        Ok(grouped)
    }
}

fn raw_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

fn lookup_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::Array(values)) => values.contains(expected) || Some(expected) == actual,
        Some(scalar) => scalar == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outfit;
    use crate::store::SqliteBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(id: &str, category: &str, color: &str) -> Item {
        serde_json::from_value(json!({
            "id": id,
            "category": category,
            "image": format!("{}/{}.jpg", category, id),
            "details": {"color": color},
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap()
    }

    fn outfit(id: &str, tags: &[&str]) -> Outfit {
        Outfit {
            id: id.to_string(),
            name: format!("outfit {}", id),
            item_ids: vec!["a1".into()],
            description: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: None,
            extra: serde_json::Map::new(),
        }
    }

    fn item_store(temp_dir: &TempDir) -> MetadataStore<Item> {
        MetadataStore::json_file(temp_dir.path().join("images/metadata.json"))
    }

    #[test]
    fn test_load_missing_collection_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(item_store(&temp_dir).load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        let items = vec![
            item("c", "tops", "red"),
            item("a", "shoes", "black"),
            item("b", "tops", "blue"),
        ];

        store.save(&items).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, items);

        store.save(&loaded).unwrap();
        assert_eq!(store.load().unwrap(), items);
    }

    #[test]
    fn test_get_recent_returns_tail_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        let items: Vec<Item> = (0..5)
            .map(|i| item(&format!("i{}", i), "tops", "red"))
            .collect();
        store.save(&items).unwrap();

        for n in 0..8 {
            let recent = store.get_recent(n).unwrap();
            let expected = &items[items.len() - n.min(items.len())..];
            assert_eq!(recent, expected, "n = {}", n);
        }
    }

    #[test]
    fn test_get_by_field_value_scalar_and_membership() {
        let temp_dir = TempDir::new().unwrap();
        let store: MetadataStore<Outfit> =
            MetadataStore::json_file(temp_dir.path().join("outfits.json"));
        store
            .save(&[
                outfit("o1", &["casual", "summer"]),
                outfit("o2", &["formal"]),
            ])
            .unwrap();

        let summer = store.get_by_field_value("tags", &json!("summer")).unwrap();
        assert_eq!(summer.len(), 1);
        assert_eq!(summer[0].id, "o1");

        let by_name = store
            .get_by_field_value("name", &json!("outfit o2"))
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, "o2");

        assert!(store
            .get_by_field_value("tags", &json!("winter"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_get_by_nested_field() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        store
            .save(&[item("a", "tops", "red"), item("b", "tops", "blue")])
            .unwrap();

        let red = store
            .get_by_field_value("details.color", &json!("red"))
            .unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].id, "a");
    }

    #[test]
    fn test_get_unique_values_flattens_sequences() {
        let temp_dir = TempDir::new().unwrap();
        let store: MetadataStore<Outfit> =
            MetadataStore::json_file(temp_dir.path().join("outfits.json"));
        store
            .save(&[
                outfit("o1", &["casual", "summer"]),
                outfit("o2", &["summer", "beach"]),
            ])
            .unwrap();

        let tags = store.get_unique_values("tags").unwrap();
        assert_eq!(tags, vec![json!("casual"), json!("summer"), json!("beach")]);
    }

    #[test]
    fn test_get_by_id_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        store
            .save(&[item("a", "tops", "red"), item("b", "shoes", "red")])
            .unwrap();

        assert_eq!(store.get_by_id("b").unwrap().category, "shoes");
        assert!(matches!(
            store.get_by_id("zzz"),
            Err(WardrobeError::NotFound { .. })
        ));

        assert!(store.delete_by_id("a").unwrap());
        assert!(!store.delete_by_id("a").unwrap());
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_moves_record_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        store
            .save(&[item("a", "tops", "red"), item("b", "shoes", "red")])
            .unwrap();

        store.upsert(item("a", "tops", "green")).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, "a");
        assert_eq!(loaded[1].detail_str("color"), "green");
    }

    #[test]
    fn test_malformed_record_is_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"[{"id": "ok", "category": "tops", "image": "tops/ok.jpg"},
                {"id": "bad", "details": "not-a-map"}]"#,
        )
        .unwrap();
        let store: MetadataStore<Item> = MetadataStore::json_file(&path);

        assert_eq!(store.load().unwrap().len(), 1);

        let lenient = store.load_lenient().unwrap();
        assert!(matches!(lenient[0], LoadedRecord::Valid(_)));
        match &lenient[1] {
            LoadedRecord::Malformed { index, id, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(id.as_deref(), Some("bad"));
            }
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_mutations_keep_records_they_cannot_parse() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata.json");
        let stale = json!({
            "id": "stale",
            "category": "tops",
            "image": "tops/stale.jpg",
            "timestamp": "2024-05-01T10:00:00"
        });
        let starred = json!({
            "id": "starred",
            "category": "shoes",
            "image": "shoes/starred.jpg",
            "details": {},
            "favorite": true
        });
        let doomed = json!({"id": "doomed", "category": "tops", "image": "tops/doomed.jpg"});
        std::fs::write(
            &path,
            serde_json::to_vec(&json!([stale, starred, doomed])).unwrap(),
        )
        .unwrap();
        let store: MetadataStore<Item> = MetadataStore::json_file(&path);
        assert_eq!(store.load().unwrap().len(), 2);

        assert!(store.delete_by_id("doomed").unwrap());
        let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!([stale, starred]));

        store.upsert(item("fresh", "tops", "red")).unwrap();
        let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let records = on_disk.as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], stale);
        assert_eq!(records[1], starred);
        assert_eq!(records[2]["id"], "fresh");
    }

    #[test]
    fn test_categories_and_grouping() {
        let temp_dir = TempDir::new().unwrap();
        let store = item_store(&temp_dir);
        store
            .save(&[
                item("a", "tops", "red"),
                item("b", "shoes", "red"),
                item("c", "tops", "blue"),
            ])
            .unwrap();

        assert_eq!(store.categories().unwrap(), vec!["shoes", "tops"]);
        let grouped = store.grouped_by_category().unwrap();
        let tops: Vec<_> = grouped["tops"].iter().map(|i| i.id.as_str()).collect();
        assert_eq!(tops, vec!["a", "c"]);
    }

    #[test]
    fn test_sqlite_backend_is_interchangeable() {
        let store: MetadataStore<Item> =
            MetadataStore::new(Arc::new(SqliteBackend::in_memory("items").unwrap()));
        let items = vec![item("x", "tops", "red"), item("y", "tops", "blue")];
        store.save(&items).unwrap();

        assert_eq!(store.load().unwrap(), items);
        assert_eq!(store.get_recent(1).unwrap()[0].id, "y");
    }
}
