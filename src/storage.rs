use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{EpochMillis, Item};
use crate::normalize::{normalize_record, record_editing_flag};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub const STORAGE_KEY: &str = "fy1_tracker_batch11_v1";
pub const AUTO_WIPE_KEY: &str = "fy1_tracker_autowipe_at";

/// Older blob keys, most recent first. Read once for migration, never written.
pub const LEGACY_STORAGE_KEYS: &[&str] = &[
    "fy1_tracker_batch10_v1",
    "fy1_tracker_batch9_v1",
    "fy1_tracker_batch8_v1",
    "fy1_tracker_batch7_v1",
    "fy1_tracker_batch6_v1",
    "fy1_tracker_batch5_v1",
    "fy1_tracker_batch4_v1",
    "fy1_tracker_batch3_v1",
    "fy1_tracker_batch2_v1",
    "fy1_tracker_batch1_v1",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedStore {
    pub items: Vec<Item>,
    /// First record that was stored in edit mode, if any.
    pub editing: Option<String>,
    /// Key the items were read from; `None` when nothing valid was found.
    pub source_key: Option<String>,
}

#[derive(Serialize)]
struct PersistedItem<'a> {
    #[serde(flatten)]
    item: &'a Item,
    editing: bool,
}

#[derive(Serialize)]
struct PersistedStore<'a> {
    items: Vec<PersistedItem<'a>>,
}

/// Whole-collection persistence of the item blob. Every save overwrites the
/// full blob, so the last writer wins when two handles share one database.
#[derive(Clone)]
pub struct ItemStorage {
    db: Arc<Database>,
    key: String,
    legacy_keys: Vec<String>,
}

impl ItemStorage {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_keys(
            db,
            STORAGE_KEY,
            LEGACY_STORAGE_KEYS.iter().map(ToString::to_string).collect(),
        )
    }

    pub fn with_keys(db: Arc<Database>, key: &str, legacy_keys: Vec<String>) -> Self {
        Self {
            db,
            key: key.to_string(),
            legacy_keys,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the current key, falling back through the legacy keys. A legacy
    /// hit is normalized and written back under the current key.
    pub fn load(&self, now: EpochMillis) -> AppResult<LoadedStore> {
        if let Some(loaded) = self.read_key(&self.key, now)? {
            return Ok(loaded);
        }

        for legacy_key in &self.legacy_keys {
            let Some(loaded) = self.read_key(legacy_key, now)? else {
                continue;
            };
            self.save(&loaded.items, loaded.editing.as_deref())?;
            tracing::info!(
                from = %legacy_key,
                to = %self.key,
                items = loaded.items.len(),
                "migrated legacy tracker data"
            );
            return Ok(loaded);
        }

        Ok(LoadedStore::default())
    }

    fn read_key(&self, key: &str, now: EpochMillis) -> AppResult<Option<LoadedStore>> {
        let Some(raw) = self.db.get_value(key)? else {
            return Ok(None);
        };
        let parsed = match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "ignoring unparsable tracker blob");
                return Ok(None);
            }
        };
        let Some(records) = parsed.get("items").and_then(Value::as_array) else {
            tracing::warn!(key = %key, "ignoring tracker blob without an items array");
            return Ok(None);
        };

        let mut editing = None;
        let items = records
            .iter()
            .map(|record| {
                let item = normalize_record(record, now);
                if editing.is_none() && record_editing_flag(record) {
                    editing = Some(item.id.clone());
                }
                item
            })
            .collect();

        Ok(Some(LoadedStore {
            items,
            editing,
            source_key: Some(key.to_string()),
        }))
    }

    pub fn save(&self, items: &[Item], editing: Option<&str>) -> AppResult<()> {
        let blob = serialize_store(items, editing)?;
        self.db.set_value(&self.key, &blob)
    }

    pub fn wipe_deadline(&self) -> AppResult<Option<EpochMillis>> {
        let raw = self.db.get_value(AUTO_WIPE_KEY)?;
        Ok(raw.and_then(|value| value.trim().parse::<EpochMillis>().ok()))
    }

    pub fn set_wipe_deadline(&self, at: EpochMillis) -> AppResult<()> {
        self.db.set_value(AUTO_WIPE_KEY, &at.to_string())
    }

    pub fn clear_wipe_deadline(&self) -> AppResult<()> {
        self.db.remove_value(AUTO_WIPE_KEY)?;
        Ok(())
    }
}

pub fn serialize_store(items: &[Item], editing: Option<&str>) -> AppResult<String> {
    let blob = PersistedStore {
        items: items
            .iter()
            .map(|item| PersistedItem {
                item,
                editing: editing == Some(item.id.as_str()),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&blob)?)
}
