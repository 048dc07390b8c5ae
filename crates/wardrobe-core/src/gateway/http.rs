//! Hosted REST backend: row endpoints under `/rest/v1` and an object store
//! under `/storage/v1`.

use super::retry::transient;
use super::{
    asset_object_path, required_str, retry_remote, EntityFields, EntityKind, RemoteGateway,
    RetryConfig, StoredAsset, UploadSource,
};
use crate::config::{NetworkConfig, RemoteSettings};
use crate::{Result, WardrobeError};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

const REPRESENTATION: &str = "return=representation";

/// REST client for the hosted row/object service.
///
/// Transient failures (timeouts, 408, 429, 5xx) are retried with backoff.
/// Rejected credentials surface as [`WardrobeError::Config`] so a run stops
/// instead of failing every entity the same way.
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    api_key: String,
    bucket: String,
    retry: RetryConfig,
}

impl HttpGateway {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/')).map_err(|e| {
            WardrobeError::Config {
                message: format!("Invalid remote URL {}: {}", settings.base_url, e),
            }
        })?;
        if settings.api_key.trim().is_empty() {
            return Err(WardrobeError::Config {
                message: "Remote API key is empty".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| WardrobeError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key.clone(),
            bucket: NetworkConfig::ASSET_BUCKET.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, suffix: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), suffix);
        Url::parse(&raw).map_err(|e| WardrobeError::Config {
            message: format!("Invalid endpoint {}: {}", raw, e),
        })
    }

    /// `{base}/rest/v1/{table}`
    fn table_url(&self, table: &str) -> Result<Url> {
        self.endpoint(&format!("rest/v1/{}", table))
    }

    /// `{base}/rest/v1/{table}?{column}=eq.{value}`
    fn filtered_url(&self, table: &str, filters: &[(&str, String)]) -> Result<Url> {
        let mut url = self.table_url(table)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (column, filter) in filters {
                pairs.append_pair(column, filter);
            }
        }
        Ok(url)
    }

    /// `{base}/storage/v1/object/{bucket}/{path}`
    fn object_url(&self, path: &str) -> Result<Url> {
        self.endpoint(&format!("storage/v1/object/{}/{}", self.bucket, path))
    }

    /// `{base}/storage/v1/object/public/{bucket}/{path}`
    fn public_object_url(&self, path: &str) -> Result<Url> {
        self.endpoint(&format!("storage/v1/object/public/{}/{}", self.bucket, path))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    /// Send with retries; non-success statuses become errors.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_remote(&self.retry, operation, || {
            let request = self.authorize(build());
            async move {
                let response = request.send().await?;
                check_status(operation, response).await
            }
        })
        .await
    }

    async fn rows(&self, operation: &str, url: Url) -> Result<Vec<EntityFields>> {
        let response = self.send(operation, || self.client.get(url.clone())).await?;
        Ok(response.json::<Vec<EntityFields>>().await?)
    }

    async fn insert_row(&self, operation: &str, table: &str, row: &Value) -> Result<EntityFields> {
        let mut url = self.table_url(table)?;
        let mut prefer = REPRESENTATION.to_string();
        if let Some(key) = row.get("idempotency_key").and_then(Value::as_str) {
            if !key.is_empty() {
                url.query_pairs_mut()
                    .append_pair("on_conflict", "idempotency_key");
                prefer = format!("resolution=merge-duplicates,{}", REPRESENTATION);
            }
        }

        let response = self
            .send(operation, || {
                self.client
                    .post(url.clone())
                    .header("Prefer", prefer.as_str())
                    .json(row)
            })
            .await?;
        let mut rows = response.json::<Vec<EntityFields>>().await?;
        if rows.is_empty() {
            return Err(WardrobeError::upstream(operation, "insert returned no rows"));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_rows(&self, operation: &str, url: Url) -> Result<usize> {
        let response = self
            .send(operation, || {
                self.client
                    .delete(url.clone())
                    .header("Prefer", REPRESENTATION)
            })
            .await?;
        Ok(response.json::<Vec<Value>>().await?.len())
    }

    /// ID of the row in `table` already stored under `key`.
    async fn find_by_key(&self, table: &str, key: &str) -> Result<Option<String>> {
        let url = self.filtered_url(
            table,
            &[("select", "id".to_string()), ("idempotency_key", eq(key))],
        )?;
        Ok(self
            .rows("find by idempotency key", url)
            .await?
            .into_iter()
            .find_map(|row| row.get("id").and_then(Value::as_str).map(String::from)))
    }

    async fn outfit_item_ids(&self, outfit_id: &str) -> Result<Vec<Value>> {
        let url = self.filtered_url(
            NetworkConfig::OUTFIT_ITEMS_TABLE,
            &[
                ("select", "clothing_item_id".to_string()),
                ("outfit_id", eq(outfit_id)),
                ("order", "position.asc".to_string()),
            ],
        )?;
        let rows = self.rows("get outfit items", url).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove("clothing_item_id"))
            .collect())
    }

    async fn insert_outfit(&self, mut fields: EntityFields) -> Result<EntityFields> {
        let owner = required_str(&fields, "user_id")?.to_string();
        let item_ids: Vec<String> = match fields.remove("item_ids") {
            None => Vec::new(),
            Some(Value::Array(values)) => values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err(WardrobeError::validation("item_ids", "item IDs must be strings")),
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(WardrobeError::validation("item_ids", "must be a sequence")),
        };

        if !item_ids.is_empty() {
            let unique: HashSet<&str> = item_ids.iter().map(String::as_str).collect();
            let list = unique
                .iter()
                .map(|id| format!("\"{}\"", id))
                .collect::<Vec<_>>()
                .join(",");
            let url = self.filtered_url(
                NetworkConfig::ITEMS_TABLE,
                &[
                    ("select", "id".to_string()),
                    ("user_id", eq(&owner)),
                    ("id", format!("in.({})", list)),
                ],
            )?;
            let owned: HashSet<String> = self
                .rows("verify outfit items", url)
                .await?
                .into_iter()
                .filter_map(|row| row.get("id").and_then(Value::as_str).map(String::from))
                .collect();
            if let Some(missing) = unique.iter().find(|id| !owned.contains(**id)) {
                return Err(WardrobeError::upstream(
                    "insert outfit",
                    format!("item {} not found or not owned by {}", missing, owner),
                ));
            }
        }

        let existing = match fields.get("idempotency_key").and_then(Value::as_str) {
            Some(key) if !key.is_empty() => {
                self.find_by_key(NetworkConfig::OUTFITS_TABLE, key).await?
            }
            _ => None,
        };

        let mut outfit = self
            .insert_row("insert outfit", NetworkConfig::OUTFITS_TABLE, &Value::Object(fields))
            .await?;
        let outfit_id = required_str(&outfit, "id")?.to_string();

        let mut needs_links = !item_ids.is_empty();
        if existing.is_some() {
            let current = self.outfit_item_ids(&outfit_id).await?;
            let wanted: Vec<Value> = item_ids.iter().cloned().map(Value::String).collect();
            if current == wanted {
                debug!("Outfit {} already linked to its items", outfit_id);
                needs_links = false;
            } else if !current.is_empty() {
                let stale = self.filtered_url(
                    NetworkConfig::OUTFIT_ITEMS_TABLE,
                    &[("outfit_id", eq(&outfit_id))],
                )?;
                self.delete_rows("replace outfit items", stale).await?;
            }
        }

        if needs_links {
            let links: Vec<Value> = item_ids
                .iter()
                .enumerate()
                .map(|(position, item_id)| {
                    json!({
                        "outfit_id": outfit_id,
                        "clothing_item_id": item_id,
                        "position": position,
                    })
                })
                .collect();
            let url = self.table_url(NetworkConfig::OUTFIT_ITEMS_TABLE)?;
            let body = Value::Array(links);
            let linked = self
                .send("link outfit items", || {
                    self.client.post(url.clone()).json(&body)
                })
                .await;

            if let Err(e) = linked {
                match existing {
                    // Leave no outfit without its items behind
                    None => {
                        if let Err(cleanup) =
                            self.delete_entity(EntityKind::Outfit, &outfit_id).await
                        {
                            warn!("Failed to remove half-created outfit {}: {}", outfit_id, cleanup);
                        }
                    }
                    Some(_) => warn!(
                        "Outfit {} from an earlier run kept; relinking failed: {}",
                        outfit_id, e
                    ),
                }
                return Err(e);
            }
        }

        outfit.insert(
            "item_ids".to_string(),
            Value::Array(item_ids.into_iter().map(Value::String).collect()),
        );
        Ok(outfit)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn ping(&self) -> Result<()> {
        let url = self.endpoint("rest/v1/")?;
        let response = self
            .authorize(self.client.get(url))
            .timeout(NetworkConfig::PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| WardrobeError::RemoteUnreachable {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WardrobeError::Config {
                message: format!("Remote rejected credentials ({})", response.status()),
            }),
            status if status.is_server_error() => Err(WardrobeError::RemoteUnreachable {
                message: format!("Remote answered {}", status),
            }),
            status => {
                debug!("Remote reachable ({})", status);
                Ok(())
            }
        }
    }

    async fn upload_asset(
        &self,
        upload: &dyn UploadSource,
        destination_hint: &str,
    ) -> Result<StoredAsset> {
        let bytes = upload.read()?;
        let object_path = asset_object_path(destination_hint, upload.name());
        let url = self.object_url(&object_path)?;
        let content_type = upload.content_type().to_string();

        self.send("upload asset", || {
            self.client
                .post(url.clone())
                .header(header::CONTENT_TYPE, content_type.as_str())
                .header("x-upsert", "true")
                .body(bytes.clone())
        })
        .await?;

        debug!("Uploaded asset {} ({} bytes)", object_path, bytes.len());
        Ok(StoredAsset {
            public_url: self.public_object_url(&object_path)?.to_string(),
            path: object_path,
        })
    }

    async fn download_asset(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(path)?;
        match self.send("download asset", || self.client.get(url.clone())).await {
            Ok(response) => Ok(response.bytes().await?.to_vec()),
            Err(WardrobeError::Upstream {
                status: Some(404), ..
            }) => Err(WardrobeError::not_found("asset", path)),
            Err(e) => Err(e),
        }
    }

    async fn insert_entity(&self, kind: EntityKind, fields: EntityFields) -> Result<EntityFields> {
        match kind {
            EntityKind::Item => {
                required_str(&fields, "user_id")?;
                required_str(&fields, "category")?;
                self.insert_row("insert item", kind.table(), &Value::Object(fields))
                    .await
            }
            EntityKind::Outfit => self.insert_outfit(fields).await,
        }
    }

    async fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<EntityFields>> {
        let url = self.filtered_url(kind.table(), &[("select", "*".to_string()), ("id", eq(id))])?;
        let Some(mut row) = self.rows("get entity", url).await?.into_iter().next() else {
            return Ok(None);
        };
        if kind == EntityKind::Outfit {
            let item_ids = self.outfit_item_ids(id).await?;
            row.insert("item_ids".to_string(), Value::Array(item_ids));
        }
        Ok(Some(row))
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let link_column = match kind {
            EntityKind::Item => "clothing_item_id",
            EntityKind::Outfit => "outfit_id",
        };

        let image_path = match kind {
            EntityKind::Item => self
                .get_entity(kind, id)
                .await?
                .and_then(|row| row.get("image_path").and_then(Value::as_str).map(String::from)),
            EntityKind::Outfit => None,
        };

        let links = self.filtered_url(NetworkConfig::OUTFIT_ITEMS_TABLE, &[(link_column, eq(id))])?;
        self.delete_rows("delete outfit items", links).await?;

        let url = self.filtered_url(kind.table(), &[("id", eq(id))])?;
        let deleted = self.delete_rows("delete entity", url).await? > 0;

        if let Some(path) = image_path.filter(|_| deleted) {
            let object = self.object_url(&path)?;
            if let Err(e) = self
                .send("delete asset", || self.client.delete(object.clone()))
                .await
            {
                warn!("Failed to delete asset {} for item {}: {}", path, id, e);
            }
        }
        Ok(deleted)
    }

    async fn query_by_owner_and_category(
        &self,
        owner_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<EntityFields>> {
        let mut filters = vec![
            ("select", "*".to_string()),
            ("user_id", eq(owner_id)),
        ];
        if let Some(category) = category {
            filters.push(("category", eq(category)));
        }
        filters.push(("order", "created_at.desc".to_string()));

        let url = self.filtered_url(NetworkConfig::ITEMS_TABLE, &filters)?;
        self.rows("query items", url).await
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

async fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(operation, status, body))
}

/// Map a non-success status to the error taxonomy.
fn status_error(operation: &str, status: StatusCode, body: String) -> WardrobeError {
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    match status.as_u16() {
        401 | 403 => WardrobeError::Config {
            message: format!("Remote rejected credentials during {}: {}", operation, message),
        },
        408 | 429 | 500..=599 => transient(operation, status.as_u16(), message),
        code => WardrobeError::Upstream {
            operation: operation.to_string(),
            message,
            status: Some(code),
            retryable: false,
        },
    }
}
