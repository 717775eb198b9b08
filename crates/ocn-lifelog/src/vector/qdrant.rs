//! Optional Qdrant-backed vector index (spec §4.5 `vector_backend:
//! "qdrant"`), grounded on the original project's `QdrantLifelogIndex`
//! collection-per-deployment setup. Feature-gated behind `qdrant` since
//! most deployments are fine with the in-memory default.

use async_trait::async_trait;
use ocn_domain::interfaces::{VectorHit, VectorIndex};
use ocn_domain::{Error, Result};
use qdrant_client::qdrant::{
    point_id::PointIdOptions, Condition, Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;

pub struct QdrantVectorIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantVectorIndex {
    pub async fn connect(url: &str, api_key: Option<&str>, collection_name: impl Into<String>) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder.build().map_err(|e| Error::UpstreamUnavailable(format!("qdrant connect failed: {e}")))?;
        Ok(Self { client, collection_name: collection_name.into() })
    }
}

fn metadata_to_payload(metadata: &Value) -> std::collections::HashMap<String, qdrant_client::qdrant::Value> {
    let mut payload = std::collections::HashMap::new();
    if let Value::Object(map) = metadata {
        for (k, v) in map {
            payload.insert(k.clone(), qdrant_client::qdrant::Value::from(v.to_string()));
        }
    }
    payload
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, id: &str, embedding: Vec<f32>, metadata: Value) -> Result<()> {
        let point = PointStruct::new(id.to_string(), embedding, metadata_to_payload(&metadata));
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name.clone(), vec![point]))
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("qdrant upsert failed: {e}")))?;
        Ok(())
    }

    async fn query(&self, embedding: Vec<f32>, top_k: usize) -> Result<Vec<VectorHit>> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(self.collection_name.clone(), embedding, top_k as u64).with_payload(true))
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("qdrant search failed: {e}")))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = match point.id.and_then(|i| i.point_id_options) {
                    Some(PointIdOptions::Uuid(u)) => u,
                    Some(PointIdOptions::Num(n)) => n.to_string(),
                    None => String::new(),
                };
                let metadata = serde_json::to_value(
                    point.payload.iter().map(|(k, v)| (k.clone(), v.to_string())).collect::<std::collections::HashMap<_, _>>(),
                )
                .unwrap_or(Value::Null);
                VectorHit { id, score: point.score, metadata }
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let filter = Filter::must([Condition::matches("id", id.to_string())]);
        self.client
            .delete_points(
                qdrant_client::qdrant::DeletePointsBuilder::new(self.collection_name.clone())
                    .points(qdrant_client::qdrant::PointsSelector::from(filter)),
            )
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("qdrant delete failed: {e}")))?;
        Ok(())
    }
}
