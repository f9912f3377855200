use crate::error::IndexError;
use crate::models::{EntryMetadata, IndexEntry, QueryHit};
use crate::retry::{client_with_timeout, DEFAULT_TIMEOUT};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Collection on a Qdrant server, driven over its REST API.
///
/// Qdrant only accepts integer or UUID point ids, so each entry id is mapped to
/// a name-based UUID and kept verbatim in the payload.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        Self::with_timeout(endpoint, collection, vector_size, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: client_with_timeout(timeout)?,
            vector_size,
        })
    }

    pub fn point_id(entry_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, entry_id.as_bytes())
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance unless it already exists,
    /// in which case its vector size must match.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;

        match response.status() {
            StatusCode::OK => {
                let info: Value = response.json().await?;
                let existing = info
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64);
                match existing {
                    Some(size) if size as usize != self.vector_size => {
                        Err(IndexError::DimensionMismatch {
                            expected: size as usize,
                            actual: self.vector_size,
                        })
                    }
                    _ => Ok(()),
                }
            }
            StatusCode::NOT_FOUND => {
                let response = self
                    .client
                    .put(self.collection_url())
                    .json(&json!({
                        "vectors": {
                            "size": self.vector_size,
                            "distance": "Cosine",
                        }
                    }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(IndexError::BackendResponse {
                        backend: BACKEND.to_string(),
                        details: format!("collection setup failed with {}", response.status()),
                    });
                }
                info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
                Ok(())
            }
            status => Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: status.to_string(),
            }),
        }
    }
}

fn malformed(details: String) -> IndexError {
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        details,
    }
}

fn payload_str<'a>(hit: &'a Value, field: &str) -> Result<&'a str, IndexError> {
    hit.pointer(&format!("/payload/{field}"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("search hit without payload.{field}: {hit}")))
}

fn hit_from_value(hit: &Value) -> Result<QueryHit, IndexError> {
    let id = payload_str(hit, "chunk_id")?.to_string();
    let text = payload_str(hit, "text")?.to_string();
    let document_name = hit
        .pointer("/payload/document_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let chunk_index = hit
        .pointer("/payload/chunk_index")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let vector = hit
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();
    let score = hit
        .pointer("/score")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed(format!("search hit without score: {hit}")))? as f32;

    Ok(QueryHit {
        entry: IndexEntry {
            id,
            vector,
            text,
            metadata: EntryMetadata {
                document_name,
                chunk_index,
            },
        },
        score,
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let points = entries
            .iter()
            .map(|entry| {
                if entry.vector.len() != self.vector_size {
                    return Err(IndexError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: entry.vector.len(),
                    });
                }

                Ok(json!({
                    "id": Self::point_id(&entry.id).to_string(),
                    "vector": entry.vector,
                    "payload": {
                        "chunk_id": entry.id,
                        "document_name": entry.metadata.document_name,
                        "chunk_index": entry.metadata.chunk_index,
                        "text": entry.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        // A single request is applied as one batch; `wait` makes it durable on return.
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        debug!(collection = %self.collection, upserted = points.len(), "qdrant upsert");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>, IndexError> {
        if vector.len() != self.vector_size {
            return Err(IndexError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::NotReady(format!(
                "qdrant collection {} does not exist",
                self.collection
            )));
        }
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(format!("search response without result array: {parsed}")))?;

        hits.iter().take(k).map(hit_from_value).collect()
    }

    async fn persist(&self) -> Result<(), IndexError> {
        // Upserts are sent with `wait=true`; nothing is buffered client-side.
        Ok(())
    }

    async fn load(&self) -> Result<(), IndexError> {
        self.ensure_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector: vec![1.0, 0.0],
            text: "chunk text".to_string(),
            metadata: EntryMetadata {
                document_name: "manual.pdf".to_string(),
                chunk_index: 3,
            },
        }
    }

    #[test]
    fn point_ids_are_stable_per_entry_id() {
        assert_eq!(
            QdrantStore::point_id("manual.pdf_0"),
            QdrantStore::point_id("manual.pdf_0")
        );
        assert_ne!(
            QdrantStore::point_id("manual.pdf_0"),
            QdrantStore::point_id("manual.pdf_1")
        );
    }

    #[tokio::test]
    async fn insert_upserts_points_with_payload() {
        let server = MockServer::start().await;
        let point_id = QdrantStore::point_id("manual.pdf_3").to_string();
        Mock::given(method("PUT"))
            .and(path("/collections/pdf_documents/points"))
            .and(query_param("wait", "true"))
            .and(body_partial_json(json!({
                "points": [{
                    "id": point_id,
                    "payload": {"chunk_id": "manual.pdf_3", "document_name": "manual.pdf"}
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        store.insert(&[entry("manual.pdf_3")]).await.unwrap();
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimensions_before_sending() {
        let server = MockServer::start().await;
        let store = QdrantStore::new(server.uri(), "pdf_documents", 3).unwrap();

        let result = store.insert(&[entry("manual.pdf_0")]).await;
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn query_maps_search_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/pdf_documents/points/search"))
            .and(body_partial_json(json!({"limit": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {
                        "id": "b3d1c1e2-0000-5000-8000-000000000000",
                        "score": 0.91,
                        "payload": {
                            "chunk_id": "manual.pdf_1",
                            "document_name": "manual.pdf",
                            "chunk_index": 1,
                            "text": "pump pressure"
                        },
                        "vector": [1.0, 0.0]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "manual.pdf_1");
        assert_eq!(hits[0].entry.text, "pump pressure");
        assert_eq!(hits[0].entry.metadata.chunk_index, 1);
        assert!((hits[0].score - 0.91).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_response_without_result_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/pdf_documents/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        let result = store.query(&[1.0, 0.0], 5).await;
        assert!(matches!(result, Err(IndexError::BackendResponse { .. })));
    }

    #[tokio::test]
    async fn hit_without_payload_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/pdf_documents/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": "b3d1c1e2-0000-5000-8000-000000000000", "score": 0.5}
                ]
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        let error = store.query(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(error, IndexError::BackendResponse { .. }));
        assert!(error.to_string().contains("payload.chunk_id"));
    }

    #[tokio::test]
    async fn empty_result_array_is_no_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/pdf_documents/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        assert!(store.query(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_collection_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/pdf_documents/points/search"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        let result = store.query(&[1.0, 0.0], 5).await;
        assert!(matches!(result, Err(IndexError::NotReady(_))));
    }

    #[tokio::test]
    async fn load_creates_missing_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/pdf_documents"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/pdf_documents"))
            .and(body_partial_json(json!({"vectors": {"size": 2, "distance": "Cosine"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        store.load().await.unwrap();
    }

    #[tokio::test]
    async fn load_rejects_collection_with_other_vector_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/pdf_documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"config": {"params": {"vectors": {"size": 384, "distance": "Cosine"}}}}
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "pdf_documents", 2).unwrap();
        let result = store.load().await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 384,
                actual: 2
            })
        ));
    }
}
