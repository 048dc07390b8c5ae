//! Local wardrobe: the item and outfit stores of one data root.

use crate::gateway::UploadSource;
use crate::models::{Item, Outfit};
use crate::resolver::{ExistingIds, ReferenceResolver};
use crate::store::{atomic_write_bytes, LocalLayout, MetadataStore};
use crate::{Result, WardrobeError};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An outfit with its item references resolved against the current items.
#[derive(Debug, Clone)]
pub struct OutfitView {
    pub outfit: Outfit,
    /// Resolved items in outfit order.
    pub items: Vec<Item>,
    /// References to items that no longer exist.
    pub missing_item_ids: Vec<String>,
}

/// Item and outfit stores plus the asset directory they share.
#[derive(Clone)]
pub struct LocalWardrobe {
    layout: LocalLayout,
    items: MetadataStore<Item>,
    outfits: MetadataStore<Outfit>,
}

impl LocalWardrobe {
    /// Wardrobe over the JSON collections under `layout`.
    pub fn open(layout: LocalLayout) -> Self {
        Self {
            items: MetadataStore::json_file(layout.items_path()),
            outfits: MetadataStore::json_file(layout.outfits_path()),
            layout,
        }
    }

    pub fn layout(&self) -> &LocalLayout {
        &self.layout
    }

    pub fn items(&self) -> &MetadataStore<Item> {
        &self.items
    }

    pub fn outfits(&self) -> &MetadataStore<Outfit> {
        &self.outfits
    }

    /// Store an uploaded image as `images/<category>/<id>.<ext>` and append
    /// the new item.
    pub fn add_item(
        &self,
        upload: &dyn UploadSource,
        category: &str,
        details: Map<String, Value>,
    ) -> Result<Item> {
        let category = category.trim();
        let path_safe = !category.is_empty()
            && category != "."
            && category != ".."
            && !category.contains(['/', '\\']);
        if !path_safe {
            return Err(WardrobeError::validation(
                "category",
                format!("{:?} is not a usable category", category),
            ));
        }

        let ext = Path::new(upload.name())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let mut item = Item::new(category, "", details)?;
        item.asset_ref = format!("{}/{}{}", category, item.id, ext);

        let bytes = upload.read()?;
        atomic_write_bytes(&self.layout.resolve_asset(&item.asset_ref)?, &bytes, false)?;
        self.items.upsert(item.clone())?;
        debug!("Saved item {} ({} bytes)", item.id, bytes.len());
        Ok(item)
    }

    /// Absolute path of an item's image.
    pub fn picture_path(&self, item_id: &str) -> Result<PathBuf> {
        let item = self.items.get_by_id(item_id)?;
        self.layout.resolve_asset(&item.asset_ref)
    }

    pub fn recent_items(&self, n: usize) -> Result<Vec<Item>> {
        self.items.get_recent(n)
    }

    /// The last `n` items whose image file is present, with its path.
    pub fn recent_uploads(&self, n: usize) -> Result<Vec<(Item, PathBuf)>> {
        let mut uploads = Vec::new();
        for item in self.items.get_recent(n)? {
            match self.layout.resolve_asset(&item.asset_ref) {
                Ok(path) if path.is_file() => uploads.push((item, path)),
                Ok(path) => debug!("Image for item {} missing at {}", item.id, path.display()),
                Err(e) => warn!("Item {} has an unusable image reference: {}", item.id, e),
            }
        }
        Ok(uploads)
    }

    /// Outfit with its references resolved against the items that exist now.
    pub fn outfit_with_items(&self, outfit_id: &str) -> Result<OutfitView> {
        let outfit = self.outfits.get_by_id(outfit_id)?;
        let items: HashMap<String, Item> = self
            .items
            .load()?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        let known: HashSet<String> = items.keys().cloned().collect();

        let existing = ExistingIds::new(&known);
        let resolution = ReferenceResolver::new(&existing).resolve(&outfit.item_ids);
        if resolution.has_gap() {
            warn!(
                "Outfit {} references missing items: {:?}",
                outfit.id, resolution.missing_ids
            );
        }

        let resolved = resolution
            .resolved_ids
            .iter()
            .filter_map(|id| items.get(id).cloned())
            .collect();
        Ok(OutfitView {
            outfit,
            items: resolved,
            missing_item_ids: resolution.missing_ids,
        })
    }

    /// Remove an outfit record. Items are untouched.
    pub fn delete_outfit(&self, outfit_id: &str) -> Result<bool> {
        self.outfits.delete_by_id(outfit_id)
    }

    /// Remove an item record. Outfits keep their references, which then
    /// show up as missing in [`outfit_with_items`](Self::outfit_with_items).
    pub fn delete_item(&self, item_id: &str) -> Result<bool> {
        self.items.delete_by_id(item_id)
    }
}
