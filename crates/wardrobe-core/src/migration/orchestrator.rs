//! Drives a local-to-remote migration run.

use super::log::{LogEvent, MigrationLog};
use super::report::MigrationReport;
use super::state::MigrationState;
use crate::backup::BackupManager;
use crate::cancel::CancellationToken;
use crate::config::{MigrationConfig, MigrationOptions};
use crate::error::ErrorKind;
use crate::gateway::{
    required_str, EntityFields, EntityKind, FileUpload, MemoryUpload, RemoteGateway, UploadSource,
};
use crate::models::{Item, Outfit};
use crate::resolver::{IdMap, ReferenceResolver, ResolutionVerdict};
use crate::store::{LoadedRecord, LocalLayout, MetadataStore};
use crate::{Result, WardrobeError};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Error that moves the run to `Failed`.
struct Abort {
    state: MigrationState,
    error: WardrobeError,
}

impl Abort {
    fn at(state: MigrationState) -> impl FnOnce(WardrobeError) -> Abort {
        move |error| Abort { state, error }
    }
}

/// Result of one item attempt, in input order.
enum ItemAttempt {
    Migrated {
        old_id: String,
        new_id: String,
        asset_path: String,
    },
    /// Rejected locally, before any remote call.
    Skipped { old_id: String, error: WardrobeError },
    /// A remote call failed.
    Failed { old_id: String, error: WardrobeError },
    NotAttempted { old_id: String },
}

/// An item that passed local checks and is ready to upload.
struct PreparedItem {
    category: String,
    upload: MemoryUpload,
    idempotency_key: String,
}

/// Moves every local item, then every local outfit, to a remote gateway.
///
/// Local collections are only read. The old-to-new item mapping lives for
/// one run; the `idempotency_key` stored with each remote record lets the
/// remote side recognize entities a previous run already created.
pub struct MigrationOrchestrator {
    gateway: Arc<dyn RemoteGateway>,
    items: MetadataStore<Item>,
    outfits: MetadataStore<Outfit>,
    layout: LocalLayout,
    options: MigrationOptions,
    cancel: CancellationToken,
}

impl MigrationOrchestrator {
    /// Orchestrator over the JSON collections of `layout`.
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        layout: LocalLayout,
        options: MigrationOptions,
    ) -> Self {
        Self {
            items: MetadataStore::json_file(layout.items_path()),
            outfits: MetadataStore::json_file(layout.outfits_path()),
            gateway,
            layout,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Read items and outfits from other stores. Assets still resolve
    /// against the layout's images directory.
    pub fn with_stores(mut self, items: MetadataStore<Item>, outfits: MetadataStore<Outfit>) -> Self {
        self.items = items;
        self.outfits = outfits;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole state machine and write the report.
    ///
    /// Returns `Err` only when the report itself cannot be written. Invalid
    /// options and every other failure end the run in `Failed` and are
    /// captured in the report.
    pub async fn run(&self) -> Result<MigrationReport> {
        let mut log = MigrationLog::new();
        let driven = match self.options.validate() {
            Ok(()) => self.drive(&mut log).await,
            Err(error) => Err(Abort {
                state: MigrationState::Backup,
                error,
            }),
        };

        match driven {
            Ok(state) => {
                advance(&mut log, state);
            }
            Err(abort) => {
                log.record(LogEvent::RunFailed {
                    state: abort.state,
                    reason: abort.error.to_string(),
                });
                log.record(LogEvent::StateEntered {
                    state: MigrationState::Report,
                });
            }
        }

        let report = MigrationReport::from_log(&log);
        report.write_to(&self.options.report_path)?;

        info!(
            "Migration {}: {} of {} items, {} of {} outfits",
            report.outcome.label(),
            report.items.migrated,
            report.items.total,
            report.outfits.migrated,
            report.outfits.total
        );
        Ok(report)
    }

    /// Walk the success path up to `Report`, returning the state reached.
    async fn drive(&self, log: &mut MigrationLog) -> std::result::Result<MigrationState, Abort> {
        let mut state = MigrationState::Backup;
        log.record(LogEvent::StateEntered { state });
        let items = self.items.load_lenient().map_err(Abort::at(state))?;
        let outfits = self.outfits.load_lenient().map_err(Abort::at(state))?;
        log.record(LogEvent::RunStarted {
            owner_id: self.options.owner_id.clone(),
            item_count: items.len(),
            outfit_count: outfits.len(),
            concurrency: self.options.concurrency,
        });
        self.backup(log).map_err(Abort::at(state))?;

        state = advance(log, state);
        self.cancel.check().map_err(Abort::at(state))?;
        self.gateway.ping().await.map_err(Abort::at(state))?;
        let mapping = self
            .migrate_items(items, log)
            .await
            .map_err(Abort::at(state))?;

        state = advance(log, state);
        self.migrate_outfits(outfits, &mapping, log)
            .await
            .map_err(Abort::at(state))?;

        Ok(advance(log, state))
    }

    fn backup(&self, log: &mut MigrationLog) -> Result<()> {
        if !self.options.create_backup {
            log.record(LogEvent::BackupDisabled);
            return Ok(());
        }

        match BackupManager::new(self.layout.clone()).snapshot() {
            Ok(handle) => {
                log.record(LogEvent::BackupCreated {
                    location: handle.location.clone(),
                    files: handle.captured.len(),
                    bytes: handle.bytes_copied,
                });
                for failure in &handle.failures {
                    log.record(LogEvent::BackupIssue {
                        path: failure.path.clone(),
                        reason: failure.reason.clone(),
                    });
                }
                if !handle.is_complete() && self.options.require_backup {
                    return Err(WardrobeError::Other(format!(
                        "backup at {} is incomplete",
                        handle.location.display()
                    )));
                }
                Ok(())
            }
            Err(e) => {
                log.record(LogEvent::BackupFailed {
                    reason: e.to_string(),
                });
                if self.options.require_backup {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Migrate items with bounded concurrency, recording results in input
    /// order. A run-level error stops new items from starting; items
    /// already in flight finish and are recorded before it is returned.
    async fn migrate_items(
        &self,
        items: Vec<LoadedRecord<Item>>,
        log: &mut MigrationLog,
    ) -> Result<IdMap> {
        let stop = CancellationToken::new();
        let mut mapping = IdMap::new();
        let mut fatal = None;

        let mut attempts = stream::iter(items.into_iter().enumerate())
            .map(|(index, record)| self.migrate_item(index, record, &stop))
            .buffered(self.options.concurrency.max(1));

        while let Some(attempt) = attempts.next().await {
            match attempt {
                ItemAttempt::Migrated {
                    old_id,
                    new_id,
                    asset_path,
                } => {
                    mapping.insert(old_id.clone(), new_id.clone());
                    log.record(LogEvent::ItemMigrated {
                        old_id,
                        new_id,
                        asset_path,
                    });
                }
                ItemAttempt::Skipped { old_id, error } => log.record(LogEvent::ItemSkipped {
                    old_id,
                    kind: error.kind(),
                    reason: error.to_string(),
                }),
                ItemAttempt::Failed { old_id, error } => {
                    log.record(LogEvent::ItemFailed {
                        old_id,
                        kind: error.kind(),
                        reason: error.to_string(),
                    });
                    if !error.is_entity_scoped() {
                        stop.cancel();
                        fatal.get_or_insert(error);
                    }
                }
                ItemAttempt::NotAttempted { old_id } => log.record(LogEvent::NotAttempted {
                    entity: EntityKind::Item,
                    old_id,
                }),
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }
        self.cancel.check()?;
        Ok(mapping)
    }

    async fn migrate_item(
        &self,
        index: usize,
        record: LoadedRecord<Item>,
        stop: &CancellationToken,
    ) -> ItemAttempt {
        let old_id = record_id(&record, index);
        if self.cancel.is_cancelled() || stop.is_cancelled() {
            return ItemAttempt::NotAttempted { old_id };
        }

        let prepared = match record
            .into_result()
            .and_then(|item| self.prepare_item(&item).map(|prepared| (item, prepared)))
        {
            Ok(prepared) => prepared,
            Err(error) => return ItemAttempt::Skipped { old_id, error },
        };

        let (item, prepared) = prepared;
        match self.push_item(&item, prepared).await {
            Ok((new_id, asset_path)) => ItemAttempt::Migrated {
                old_id,
                new_id,
                asset_path,
            },
            Err(error) => ItemAttempt::Failed { old_id, error },
        }
    }

    /// Local checks: category, asset reference and asset bytes.
    fn prepare_item(&self, item: &Item) -> Result<PreparedItem> {
        if item.id.trim().is_empty() {
            return Err(WardrobeError::validation("id", "item has no id"));
        }
        let category = item
            .effective_category()
            .ok_or_else(|| {
                WardrobeError::validation("category", format!("item {} has no category", item.id))
            })?
            .to_string();

        let path = self.layout.resolve_asset(&item.asset_ref)?;
        let file = FileUpload::new(&path);
        let bytes = file.read().map_err(|e| WardrobeError::AssetUnavailable {
            item_id: item.id.clone(),
            path: path.clone(),
            reason: match e {
                WardrobeError::Io {
                    source: Some(source),
                    ..
                } => source.to_string(),
                other => other.to_string(),
            },
        })?;

        // Object name derives from the key; re-runs target the same path
        let idempotency_key = idempotency_key(&[item.id.as_bytes(), &bytes]);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        let upload = MemoryUpload::from_source(&file, bytes)
            .with_name(format!("{}.{}", idempotency_key, ext));
        Ok(PreparedItem {
            category,
            upload,
            idempotency_key,
        })
    }

    async fn push_item(&self, item: &Item, prepared: PreparedItem) -> Result<(String, String)> {
        let owner = &self.options.owner_id;
        let destination = format!("{}/{}", owner, prepared.category);
        let asset = self
            .gateway
            .upload_asset(&prepared.upload, &destination)
            .await?;
        debug!("Uploaded asset for item {} to {}", item.id, asset.path);

        let fields = json!({
            "user_id": owner,
            "name": item.detail_str("name"),
            "category": prepared.category,
            "color": item.detail_str("color"),
            "brand": item.detail_str("brand"),
            "notes": item.detail_str("notes"),
            "image_url": asset.public_url,
            "image_path": asset.path,
            "details": Value::Object(item.details.clone()),
            "source_id": item.id,
            "source_created_at": item.created_at.map(|t| t.to_rfc3339()),
            "idempotency_key": prepared.idempotency_key,
        });
        let row = self
            .gateway
            .insert_entity(EntityKind::Item, into_fields(fields))
            .await?;
        let new_id = required_str(&row, "id")?.to_string();
        Ok((new_id, asset.path))
    }

    /// Outfits run one at a time, after the item phase has finished.
    async fn migrate_outfits(
        &self,
        outfits: Vec<LoadedRecord<Outfit>>,
        mapping: &IdMap,
        log: &mut MigrationLog,
    ) -> Result<()> {
        let resolver = ReferenceResolver::new(mapping);
        let mut records = outfits.into_iter().enumerate();

        while let Some((index, record)) = records.next() {
            if self.cancel.is_cancelled() {
                log.record(LogEvent::NotAttempted {
                    entity: EntityKind::Outfit,
                    old_id: record_id(&record, index),
                });
                for (index, rest) in records.by_ref() {
                    log.record(LogEvent::NotAttempted {
                        entity: EntityKind::Outfit,
                        old_id: record_id(&rest, index),
                    });
                }
                return Err(WardrobeError::Cancelled);
            }

            let outfit = match record {
                LoadedRecord::Valid(outfit) if !outfit.id.trim().is_empty() => outfit,
                other => {
                    let old_id = record_id(&other, index);
                    let error = match other.into_result() {
                        Ok(_) => WardrobeError::validation("id", "outfit has no id"),
                        Err(e) => e,
                    };
                    log.record(LogEvent::OutfitSkipped {
                        old_id,
                        kind: error.kind(),
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let resolution = resolver.resolve(&outfit.item_ids);
            for missing in &resolution.missing_ids {
                log.record(LogEvent::ReferentialGap {
                    outfit_id: outfit.id.clone(),
                    missing_item_id: missing.clone(),
                });
            }
            if resolution.verdict() == ResolutionVerdict::Unresolvable {
                let reason = if outfit.item_ids.is_empty() {
                    "outfit has no items"
                } else {
                    "no referenced item was migrated"
                };
                log.record(LogEvent::OutfitSkipped {
                    old_id: outfit.id.clone(),
                    kind: ErrorKind::ReferentialGap,
                    reason: reason.to_string(),
                });
                continue;
            }

            let name = outfit_name(&outfit);
            match self.push_outfit(&outfit, &name, &resolution.resolved_ids).await {
                Ok(new_id) => log.record(LogEvent::OutfitMigrated {
                    old_id: outfit.id.clone(),
                    new_id,
                    name,
                    item_count: resolution.resolved_ids.len(),
                }),
                Err(error) => {
                    log.record(LogEvent::OutfitFailed {
                        old_id: outfit.id.clone(),
                        kind: error.kind(),
                        reason: error.to_string(),
                    });
                    if error.is_entity_scoped() {
                        continue;
                    }
                    for (index, rest) in records.by_ref() {
                        log.record(LogEvent::NotAttempted {
                            entity: EntityKind::Outfit,
                            old_id: record_id(&rest, index),
                        });
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    async fn push_outfit(&self, outfit: &Outfit, name: &str, item_ids: &[String]) -> Result<String> {
        let fields = json!({
            "user_id": self.options.owner_id,
            "name": name,
            "description": outfit.description.clone().unwrap_or_default(),
            "tags": outfit.tags,
            "item_ids": item_ids,
            "source_id": outfit.id,
            "source_created_at": outfit.created_at.map(|t| t.to_rfc3339()),
            "idempotency_key": outfit_key(&outfit.id, item_ids),
        });
        let row = self
            .gateway
            .insert_entity(EntityKind::Outfit, into_fields(fields))
            .await?;
        Ok(required_str(&row, "id")?.to_string())
    }
}

/// Move to the next state on the success path and log the transition.
fn advance(log: &mut MigrationLog, state: MigrationState) -> MigrationState {
    match state.next() {
        Some(next) => {
            log.record(LogEvent::StateEntered { state: next });
            next
        }
        None => state,
    }
}

/// Stable key for a migrated entity: hex SHA-256 over the parts, each
/// followed by a zero byte.
fn idempotency_key(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Key of a migrated outfit: its old ID plus the new IDs it links, in order.
fn outfit_key(old_id: &str, item_ids: &[String]) -> String {
    let joined = item_ids.join(",");
    idempotency_key(&[old_id.as_bytes(), joined.as_bytes()])
}

fn outfit_name(outfit: &Outfit) -> String {
    let name = outfit.name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    let short: String = outfit
        .id
        .chars()
        .take(MigrationConfig::FALLBACK_NAME_ID_CHARS)
        .collect();
    format!("{} {}", MigrationConfig::FALLBACK_OUTFIT_NAME_PREFIX, short)
}

fn record_id<R: crate::models::Record>(record: &LoadedRecord<R>, index: usize) -> String {
    let id = match record {
        LoadedRecord::Valid(r) => Some(r.id().to_string()),
        LoadedRecord::Malformed { id, .. } => id.clone(),
    };
    id.filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("#{}", index))
}

fn into_fields(value: Value) -> EntityFields {
    match value {
        Value::Object(map) => map,
        _ => EntityFields::new(),
    }
}
