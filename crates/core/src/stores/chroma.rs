use crate::error::StoreError;
use crate::models::{ChunkRecord, Metadata, MetadataFilter, QueryHit};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

const BACKEND: &str = "chroma";

pub struct ChromaStore {
    base: Url,
    client: Client,
    collection_ids: Mutex<HashMap<String, String>>,
}

impl ChromaStore {
    pub fn new(endpoint: &str) -> Result<Self, StoreError> {
        let mut base = Url::parse(endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            client: Client::new(),
            collection_ids: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(path)?)
    }

    async fn collection_id(&self, name: &str) -> Result<String, StoreError> {
        if let Some(id) = self.collection_ids.lock().await.get(name) {
            return Ok(id.clone());
        }

        let response = self
            .client
            .post(self.url("api/v1/collections")?)
            .json(&json!({ "name": name, "get_or_create": true }))
            .send()
            .await?;
        let parsed = check(response).await?.json::<Value>().await?;

        let id = parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .ok_or_else(|| backend_error("collection response has no id"))?
            .to_string();

        debug!(collection = name, id = %id, "resolved chroma collection");
        self.collection_ids
            .lock()
            .await
            .insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn post_collection(
        &self,
        collection: &str,
        action: &str,
        body: Value,
    ) -> Result<Response, StoreError> {
        let id = self.collection_id(collection).await?;
        let response = self
            .client
            .post(self.url(&format!("api/v1/collections/{id}/{action}"))?)
            .json(&body)
            .send()
            .await?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

fn backend_error(details: &str) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.to_string(),
    }
}

fn sanitize_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Array(items) => Value::from(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                Value::Object(_) => Value::from(value.to_string()),
                scalar => scalar.clone(),
            };
            Some((key.clone(), value))
        })
        .collect()
}

fn metadata_at(value: Option<&Value>) -> Metadata {
    value
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn text_at(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn column<'a>(parsed: &'a Value, pointer: &str) -> &'a [Value] {
    parsed
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parse_get_response(parsed: &Value) -> Result<Vec<ChunkRecord>, StoreError> {
    let ids = column(parsed, "/ids");
    let documents = column(parsed, "/documents");
    let metadatas = column(parsed, "/metadatas");

    ids.iter()
        .enumerate()
        .map(|(index, id)| {
            let id = id
                .as_str()
                .ok_or_else(|| backend_error("non-string chunk id"))?;
            Ok(ChunkRecord {
                id: id.to_string(),
                text: text_at(documents.get(index)),
                metadata: metadata_at(metadatas.get(index)),
            })
        })
        .collect()
}

fn parse_query_response(parsed: &Value) -> Result<Vec<QueryHit>, StoreError> {
    let ids = column(parsed, "/ids/0");
    let documents = column(parsed, "/documents/0");
    let metadatas = column(parsed, "/metadatas/0");
    let distances = column(parsed, "/distances/0");

    if distances.len() != ids.len() {
        return Err(backend_error("query response has mismatched ids and distances"));
    }

    ids.iter()
        .zip(distances)
        .enumerate()
        .map(|(index, (id, distance))| {
            let id = id
                .as_str()
                .ok_or_else(|| backend_error("non-string chunk id"))?;
            let distance = distance
                .as_f64()
                .ok_or_else(|| backend_error("non-numeric distance"))?;
            Ok(QueryHit {
                record: ChunkRecord {
                    id: id.to_string(),
                    text: text_at(documents.get(index)),
                    metadata: metadata_at(metadatas.get(index)),
                },
                distance,
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn add(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                records.len()
            )));
        }

        if records.is_empty() {
            return Ok(());
        }

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        let documents: Vec<&str> = records.iter().map(|record| record.text.as_str()).collect();
        let metadatas: Vec<Metadata> = records
            .iter()
            .map(|record| sanitize_metadata(&record.metadata))
            .collect();

        self.post_collection(
            collection,
            "add",
            json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let response = self
            .post_collection(
                collection,
                "query",
                json!({
                    "query_embeddings": [embedding],
                    "n_results": n_results,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        parse_query_response(&response.json::<Value>().await?)
    }

    async fn get(
        &self,
        collection: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut body = json!({ "include": ["documents", "metadatas"] });
        if let Some(filter) = filter {
            let mut clause = Metadata::new();
            clause.insert(filter.key.clone(), filter.value.clone());
            body["where"] = Value::Object(clause);
        }

        let response = self.post_collection(collection, "get", body).await?;
        parse_get_response(&response.json::<Value>().await?)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.post_collection(collection, "delete", json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let id = self.collection_id(collection).await?;
        let response = self
            .client
            .get(self.url(&format!("api/v1/collections/{id}/count"))?)
            .send()
            .await?;
        let parsed = check(response).await?.json::<Value>().await?;

        parsed
            .as_u64()
            .map(|count| count as usize)
            .ok_or_else(|| backend_error("count response is not an integer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_flattened_for_chroma() {
        let mut metadata = Metadata::new();
        metadata.insert("page".to_string(), Value::Null);
        metadata.insert("tags".to_string(), json!(["pv", "battery", 3]));
        metadata.insert("chunk_index".to_string(), json!(4));
        metadata.insert("extra".to_string(), json!({ "a": 1 }));

        let sanitized = sanitize_metadata(&metadata);

        assert!(!sanitized.contains_key("page"));
        assert_eq!(sanitized.get("tags"), Some(&json!("pv,battery,3")));
        assert_eq!(sanitized.get("chunk_index"), Some(&json!(4)));
        assert_eq!(sanitized.get("extra"), Some(&json!("{\"a\":1}")));
    }

    #[test]
    fn query_response_columns_are_zipped() -> Result<(), StoreError> {
        let parsed = json!({
            "ids": [["c1", "c2"]],
            "documents": [["first", "second"]],
            "metadatas": [[{ "document_id": "d1" }, null]],
            "distances": [[0.2, 0.9]],
        });

        let hits = parse_query_response(&parsed)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.text, "first");
        assert_eq!(hits[0].record.metadata.get("document_id"), Some(&json!("d1")));
        assert!(hits[1].record.metadata.is_empty());
        assert!((hits[1].distance - 0.9).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn mismatched_query_columns_are_rejected() {
        let parsed = json!({ "ids": [["c1"]], "distances": [[]] });
        assert!(matches!(
            parse_query_response(&parsed),
            Err(StoreError::BackendResponse { .. })
        ));
    }

    #[test]
    fn get_response_is_parsed() -> Result<(), StoreError> {
        let parsed = json!({
            "ids": ["c1"],
            "documents": ["inverter efficiency"],
            "metadatas": [{ "source": "/data/a.pdf", "page": 2 }],
        });

        let records = parse_get_response(&parsed)?;
        assert_eq!(records[0].id, "c1");
        assert_eq!(records[0].metadata.get("page"), Some(&json!(2)));
        Ok(())
    }

    #[test]
    fn endpoint_paths_are_joined() -> Result<(), StoreError> {
        let store = ChromaStore::new("http://localhost:8000")?;
        assert_eq!(
            store.url("api/v1/collections")?.as_str(),
            "http://localhost:8000/api/v1/collections"
        );

        let prefixed = ChromaStore::new("http://proxy:9000/chroma")?;
        assert_eq!(
            prefixed.url("api/v1/collections")?.as_str(),
            "http://proxy:9000/chroma/api/v1/collections"
        );
        Ok(())
    }
}
