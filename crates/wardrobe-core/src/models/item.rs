use crate::{Result, WardrobeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single clothing item with one image and a category.
///
/// The typed fields carry the invariants; `details` is the open extension map
/// for whatever extra fields callers attach (name, color, brand, notes, ...).
/// Field names on disk follow the local `metadata.json` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub category: String,
    /// Asset path relative to the images directory, or a URL.
    #[serde(rename = "image", alias = "asset_ref", alias = "assetRef", default)]
    pub asset_ref: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(
        rename = "timestamp",
        alias = "created_at",
        alias = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Top-level keys this type does not model, written back unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    /// Create a new item with a fresh ID and creation time.
    pub fn new(
        category: impl Into<String>,
        asset_ref: impl Into<String>,
        details: Map<String, Value>,
    ) -> Result<Self> {
        let item = Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: category.into(),
            asset_ref: asset_ref.into(),
            details,
            created_at: Some(Utc::now()),
            extra: Map::new(),
        };
        item.validate()?;
        Ok(item)
    }

    /// `details.category` when set, otherwise the top-level category.
    pub fn effective_category(&self) -> Option<&str> {
        self.details
            .get("category")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or_else(|| Some(self.category.trim()).filter(|c| !c.is_empty()))
    }

    /// String detail by key, empty when absent or not a string.
    pub fn detail_str(&self, key: &str) -> &str {
        self.details.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(WardrobeError::validation("id", "item has no id"));
        }
        if self.effective_category().is_none() {
            return Err(WardrobeError::validation(
                "category",
                format!("item {} has no category", self.id),
            ));
        }
        Ok(())
    }
}
