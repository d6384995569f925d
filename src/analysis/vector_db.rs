//! Similarity index backends: Qdrant and an in-process snapshot index

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, CreateCollectionBuilder, Distance, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Similarity metric of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

impl Metric {
    fn distance(self) -> Distance {
        match self {
            Metric::Cosine => Distance::Cosine,
            Metric::Dot => Distance::Dot,
            Metric::Euclid => Distance::Euclid,
        }
    }

    /// Raw score between two vectors of equal length.
    fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Metric::Dot => dot,
            Metric::Cosine => {
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
            Metric::Euclid => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Whether a higher score is a better match.
    fn higher_is_better(self) -> bool {
        !matches!(self, Metric::Euclid)
    }
}

/// Index creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub region: String,
}

/// Stored item: id, vector and string metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// Query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// Similarity-search service.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Create the index; no-op when it already exists.
    async fn create_index(&self, spec: &IndexSpec) -> Result<()>;

    /// Insert or overwrite entries by id.
    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Up to `top_k` entries ranked best first.
    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredMatch>>;
}

/// Vector store backed by Qdrant
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    /// Connect to Qdrant server; every request is bounded by `timeout`
    pub fn connect(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut builder = Qdrant::from_url(url).timeout(timeout);
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            builder = builder.api_key(key.to_string());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

fn point_id(id: &str) -> PointId {
    // Qdrant accepts unsigned integers or UUID strings
    match id.parse::<u64>() {
        Ok(n) => PointId::from(n),
        Err(_) => PointId::from(id.to_string()),
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(s)) => s,
        None => String::new(),
    }
}

trait QdrantValueExt {
    fn as_text(&self) -> Option<String>;
}

impl QdrantValueExt for QdrantValue {
    fn as_text(&self) -> Option<String> {
        use qdrant_client::qdrant::value::Kind;
        match &self.kind {
            Some(Kind::StringValue(v)) => Some(v.clone()),
            Some(Kind::IntegerValue(v)) => Some(v.to_string()),
            Some(Kind::DoubleValue(v)) => Some(v.to_string()),
            Some(Kind::BoolValue(v)) => Some(v.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let collections = self.client.list_collections().await?;
        let exists = collections.collections.iter().any(|c| c.name == spec.name);

        if exists {
            debug!("Collection '{}' already exists", spec.name);
            return Ok(());
        }

        info!(
            "Creating collection '{}' (dim {}, {:?}); region '{}' is ignored by Qdrant",
            spec.name, spec.dimension, spec.metric, spec.region
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(spec.name.clone()).vectors_config(
                    VectorParamsBuilder::new(spec.dimension as u64, spec.metric.distance()),
                ),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = entries
            .iter()
            .map(|entry| {
                let payload: HashMap<String, QdrantValue> = entry
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect();
                PointStruct::new(point_id(&entry.id), entry.vector.clone(), payload)
            })
            .collect();

        debug!("Upserting {} points to Qdrant", points.len());
        self.client
            .upsert_points(UpsertPointsBuilder::new(index, points).wait(true))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredMatch>> {
        let search = SearchPointsBuilder::new(index, vector.to_vec(), top_k as u64)
            .with_payload(include_metadata);
        let results = self.client.search_points(search).await?;

        Ok(results
            .result
            .into_iter()
            .map(|point| ScoredMatch {
                id: point_id_string(point.id),
                score: point.score,
                metadata: point
                    .payload
                    .iter()
                    .filter_map(|(k, v)| v.as_text().map(|t| (k.clone(), t)))
                    .collect(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalCollection {
    dimension: usize,
    metric: Metric,
    entries: Vec<IndexEntry>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl LocalCollection {
    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.id.clone(), pos))
            .collect();
    }
}

/// In-process index with an optional JSON snapshot on disk.
///
/// Exact scan over all entries; ties keep insertion order.
#[derive(Debug, Default)]
pub struct LocalIndex {
    collections: RwLock<BTreeMap<String, LocalCollection>>,
    snapshot: Option<PathBuf>,
}

impl LocalIndex {
    /// Memory-only index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index persisted at `path`; loads the snapshot when the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut collections: BTreeMap<String, LocalCollection> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        for collection in collections.values_mut() {
            collection.reindex();
        }
        debug!(
            "Local index {} ({} collections)",
            path.display(),
            collections.len()
        );

        Ok(Self {
            collections: RwLock::new(collections),
            snapshot: Some(path),
        })
    }

    /// Number of entries in `index`, if it exists.
    pub async fn len(&self, index: &str) -> Option<usize> {
        self.collections
            .read()
            .await
            .get(index)
            .map(|c| c.entries.len())
    }

    async fn persist(&self, collections: &BTreeMap<String, LocalCollection>) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec(collections)?).await?;
        Ok(())
    }
}

fn missing_index(index: &str) -> Error {
    Error::Configuration(format!("index '{}' does not exist", index))
}

fn check_dimension(index: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::Configuration(format!(
            "index '{}' expects {}-dimensional vectors, got {}",
            index, expected, actual
        )));
    }
    Ok(())
}

#[async_trait]
impl SimilarityIndex for LocalIndex {
    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(&spec.name) {
            check_dimension(&spec.name, existing.dimension, spec.dimension)?;
            debug!("Local index '{}' already exists", spec.name);
            return Ok(());
        }

        collections.insert(
            spec.name.clone(),
            LocalCollection {
                dimension: spec.dimension,
                metric: spec.metric,
                entries: Vec::new(),
                positions: HashMap::new(),
            },
        );
        info!(
            "Created local index '{}' (dim {}, {:?})",
            spec.name, spec.dimension, spec.metric
        );
        self.persist(&collections).await
    }

    async fn upsert(&self, index: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(index).ok_or_else(|| missing_index(index))?;

        for entry in entries {
            check_dimension(index, collection.dimension, entry.vector.len())?;
        }
        for entry in entries {
            match collection.positions.get(&entry.id) {
                Some(&pos) => collection.entries[pos] = entry.clone(),
                None => {
                    collection
                        .positions
                        .insert(entry.id.clone(), collection.entries.len());
                    collection.entries.push(entry.clone());
                }
            }
        }

        self.persist(&collections).await
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredMatch>> {
        let collections = self.collections.read().await;
        let collection = collections.get(index).ok_or_else(|| missing_index(index))?;
        check_dimension(index, collection.dimension, vector.len())?;

        let metric = collection.metric;
        let mut scored: Vec<(f32, &IndexEntry)> = collection
            .entries
            .iter()
            .map(|e| (metric.score(vector, &e.vector), e))
            .collect();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| {
            let ord = a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal);
            if metric.higher_is_better() {
                ord.reverse()
            } else {
                ord
            }
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, e)| ScoredMatch {
                id: e.id.clone(),
                score,
                metadata: if include_metadata {
                    e.metadata.clone()
                } else {
                    BTreeMap::new()
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec(dimension: usize, metric: Metric) -> IndexSpec {
        IndexSpec {
            name: "nodes".to_string(),
            dimension,
            metric,
            region: "us-east-1".to_string(),
        }
    }

    fn entry(id: &str, vector: Vec<f32>, node: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: BTreeMap::from([("node".to_string(), node.to_string())]),
        }
    }

    #[tokio::test]
    async fn identical_vector_is_top_match() {
        let index = LocalIndex::new();
        index.create_index(&spec(3, Metric::Cosine)).await.unwrap();
        index
            .upsert(
                "nodes",
                &[
                    entry("0", vec![1.0, 0.0, 0.0], "paris"),
                    entry("1", vec![0.0, 1.0, 0.0], "france"),
                    entry("2", vec![0.6, 0.8, 0.0], "europe"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query("nodes", &[0.0, 1.0, 0.0], 2, true)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata["node"], "france");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].metadata["node"], "europe");
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let index = LocalIndex::new();
        index.create_index(&spec(2, Metric::Dot)).await.unwrap();
        index
            .upsert(
                "nodes",
                &[
                    entry("a", vec![1.0, 0.0], "first"),
                    entry("b", vec![1.0, 0.0], "second"),
                ],
            )
            .await
            .unwrap();

        let hits = index.query("nodes", &[1.0, 0.0], 5, true).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
    }

    #[tokio::test]
    async fn euclid_ranks_nearest_first() {
        let index = LocalIndex::new();
        index.create_index(&spec(1, Metric::Euclid)).await.unwrap();
        index
            .upsert(
                "nodes",
                &[entry("far", vec![10.0], "far"), entry("near", vec![1.0], "near")],
            )
            .await
            .unwrap();

        let hits = index.query("nodes", &[0.0], 1, false).await.unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn upsert_with_same_id_overwrites() {
        let index = LocalIndex::new();
        index.create_index(&spec(2, Metric::Cosine)).await.unwrap();
        let batch = [entry("0", vec![1.0, 0.0], "paris")];

        index.upsert("nodes", &batch).await.unwrap();
        index.upsert("nodes", &batch).await.unwrap();
        index
            .upsert("nodes", &[entry("0", vec![0.0, 1.0], "paris v2")])
            .await
            .unwrap();

        assert_eq!(index.len("nodes").await, Some(1));
        let hits = index.query("nodes", &[0.0, 1.0], 1, true).await.unwrap();
        assert_eq!(hits[0].metadata["node"], "paris v2");
    }

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let index = LocalIndex::new();
        index.create_index(&spec(2, Metric::Cosine)).await.unwrap();
        index
            .upsert("nodes", &[entry("0", vec![1.0, 0.0], "paris")])
            .await
            .unwrap();
        index.create_index(&spec(2, Metric::Cosine)).await.unwrap();

        assert_eq!(index.len("nodes").await, Some(1));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_configuration_error() {
        let index = LocalIndex::new();
        index.create_index(&spec(3, Metric::Cosine)).await.unwrap();

        let err = index
            .upsert("nodes", &[entry("0", vec![1.0], "short")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = index.create_index(&spec(4, Metric::Cosine)).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn unknown_index_is_configuration_error() {
        let index = LocalIndex::new();
        let err = index.query("missing", &[1.0], 3, true).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index").join("nodes.json");

        {
            let index = LocalIndex::open(&path).unwrap();
            index.create_index(&spec(2, Metric::Cosine)).await.unwrap();
            index
                .upsert("nodes", &[entry("0", vec![1.0, 0.0], "paris")])
                .await
                .unwrap();
        }

        let reopened = LocalIndex::open(&path).unwrap();
        assert_eq!(reopened.len("nodes").await, Some(1));
        reopened
            .upsert("nodes", &[entry("0", vec![0.0, 1.0], "paris")])
            .await
            .unwrap();
        assert_eq!(reopened.len("nodes").await, Some(1));
    }

    #[test]
    fn numeric_ids_map_to_numeric_points() {
        assert_eq!(point_id_string(Some(point_id("42"))), "42");
        let uuid = "5c56c793-69f3-4fbf-87e6-c4bf54c28c26";
        assert_eq!(point_id_string(Some(point_id(uuid))), uuid);
    }
}
