use super::CompatibilityCache;
use crate::config::CompatibilityConfig;
use crate::gateway::{EntityKind, RemoteGateway};
use crate::models::CompatibilityResult;
use crate::{Result, WardrobeError};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Output of one model run over a pair of images.
#[derive(Debug, Clone, PartialEq)]
pub struct PairPrediction {
    pub score: f64,
    pub embedding_a: Vec<f32>,
    pub embedding_b: Vec<f32>,
}

/// Pairwise compatibility model. Opaque to the library.
pub trait CompatibilityModel: Send + Sync {
    /// Version stamped on every result this model produces.
    fn model_version(&self) -> &str;

    fn predict(&self, image_a: &[u8], image_b: &[u8]) -> Result<PairPrediction>;
}

/// Scores item pairs, serving repeated requests from the cache.
pub struct CompatibilityScorer {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CompatibilityCache>,
    model: Arc<dyn CompatibilityModel>,
    embedding_len: usize,
}

impl CompatibilityScorer {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CompatibilityCache>,
        model: Arc<dyn CompatibilityModel>,
    ) -> Self {
        Self {
            gateway,
            cache,
            model,
            embedding_len: CompatibilityConfig::EMBEDDING_LEN,
        }
    }

    pub fn with_embedding_len(mut self, embedding_len: usize) -> Self {
        self.embedding_len = embedding_len;
        self
    }

    /// Compatibility of items `a` and `b` (remote IDs).
    ///
    /// A cached result from the current model version is returned as stored.
    /// Anything else is re-scored and replaces the cached row.
    pub async fn score(&self, a: &str, b: &str) -> Result<CompatibilityResult> {
        let version = self.model.model_version();
        if let Some(hit) = self.cache.get_current(a, b, version)? {
            debug!("Compatibility cache hit for {}|{}", a, b);
            return Ok(hit);
        }

        let path_a = self.asset_path(a).await?;
        let path_b = self.asset_path(b).await?;
        let image_a = self.gateway.download_asset(&path_a).await?;
        let image_b = self.gateway.download_asset(&path_b).await?;

        let prediction = self.model.predict(&image_a, &image_b)?;
        for embedding in [&prediction.embedding_a, &prediction.embedding_b] {
            if embedding.len() != self.embedding_len {
                return Err(WardrobeError::validation(
                    "embedding",
                    format!(
                        "model returned {} values, expected {}",
                        embedding.len(),
                        self.embedding_len
                    ),
                ));
            }
        }

        let result = CompatibilityResult {
            item_a: a.to_string(),
            item_b: b.to_string(),
            score: prediction.score,
            embedding_a: prediction.embedding_a,
            embedding_b: prediction.embedding_b,
            model_version: version.to_string(),
        };
        self.cache.put(a, b, result.clone())?;
        debug!("Scored {}|{} = {:.3}", a, b, result.score);
        Ok(result.canonical())
    }

    async fn asset_path(&self, item_id: &str) -> Result<String> {
        let row = self
            .gateway
            .get_entity(EntityKind::Item, item_id)
            .await?
            .ok_or_else(|| WardrobeError::not_found("item", item_id))?;

        row.get("image_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .ok_or_else(|| WardrobeError::AssetUnavailable {
                item_id: item_id.to_string(),
                path: PathBuf::new(),
                reason: "item has no stored image".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryUpload, SqliteGateway};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct LengthModel {
        calls: AtomicUsize,
        version: String,
    }

    impl LengthModel {
        fn new(version: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                version: version.to_string(),
            }
        }
    }

    impl CompatibilityModel for LengthModel {
        fn model_version(&self) -> &str {
            &self.version
        }

        fn predict(&self, image_a: &[u8], image_b: &[u8]) -> Result<PairPrediction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PairPrediction {
                score: image_a.len() as f64 / (image_a.len() + image_b.len()) as f64,
                embedding_a: vec![image_a.len() as f32; 4],
                embedding_b: vec![image_b.len() as f32; 4],
            })
        }
    }

    async fn item_with_image(gateway: &SqliteGateway, bytes: &[u8]) -> String {
        let name = format!("{}.jpg", uuid::Uuid::new_v4());
        let upload = MemoryUpload::new(bytes.to_vec(), name, "image/jpeg");
        let asset = gateway.upload_asset(&upload, "u1/tops").await.unwrap();
        let row = gateway
            .insert_entity(
                EntityKind::Item,
                json!({"user_id": "u1", "category": "tops", "image_path": asset.path})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_score_caches_and_reuses() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(SqliteGateway::in_memory(temp_dir.path()).unwrap());
        let a = item_with_image(&gateway, b"aaa").await;
        let b = item_with_image(&gateway, b"b").await;

        let cache = Arc::new(CompatibilityCache::in_memory().unwrap());
        let model = Arc::new(LengthModel::new("v1.0"));
        let scorer = CompatibilityScorer::new(gateway.clone(), cache.clone(), model.clone())
            .with_embedding_len(4);

        let first = scorer.score(&a, &b).await.unwrap();
        let second = scorer.score(&b, &a).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.embedding_for(&a), Some(&[3.0; 4][..]));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_model_version_rescores() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(SqliteGateway::in_memory(temp_dir.path()).unwrap());
        let a = item_with_image(&gateway, b"aa").await;
        let b = item_with_image(&gateway, b"bb").await;
        let cache = Arc::new(CompatibilityCache::in_memory().unwrap());

        let old = CompatibilityScorer::new(
            gateway.clone(),
            cache.clone(),
            Arc::new(LengthModel::new("v1.0")),
        )
        .with_embedding_len(4);
        old.score(&a, &b).await.unwrap();

        let upgraded = Arc::new(LengthModel::new("v2.0"));
        let scorer = CompatibilityScorer::new(gateway, cache.clone(), upgraded.clone())
            .with_embedding_len(4);
        let result = scorer.score(&a, &b).await.unwrap();
        assert_eq!(result.model_version, "v2.0");
        assert_eq!(upgraded.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(SqliteGateway::in_memory(temp_dir.path()).unwrap());
        let a = item_with_image(&gateway, b"aa").await;
        let scorer = CompatibilityScorer::new(
            gateway,
            Arc::new(CompatibilityCache::in_memory().unwrap()),
            Arc::new(LengthModel::new("v1.0")),
        );

        let err = scorer.score(&a, "ghost").await.unwrap_err();
        assert!(matches!(err, WardrobeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_wrong_embedding_length_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(SqliteGateway::in_memory(temp_dir.path()).unwrap());
        let a = item_with_image(&gateway, b"aa").await;
        let b = item_with_image(&gateway, b"bb").await;
        let cache = Arc::new(CompatibilityCache::in_memory().unwrap());
        let scorer =
            CompatibilityScorer::new(gateway, cache.clone(), Arc::new(LengthModel::new("v1.0")));

        let err = scorer.score(&a, &b).await.unwrap_err();
        assert!(matches!(err, WardrobeError::Validation { .. }));
        assert!(cache.is_empty().unwrap());
    }
}
