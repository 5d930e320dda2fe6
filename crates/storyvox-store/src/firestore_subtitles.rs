//! Firestore-backed subtitle store.
//!
//! Segments live in `jobs/{job_id}/subtitles/{index:05}`, so document order
//! is index order.

use async_trait::async_trait;
use tracing::info;

use storyvox_models::{JobId, TranscriptSegment};

use crate::client::{FirestoreClient, MAX_BATCH_WRITES};
use crate::contract::SubtitleStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{from_document, to_fields, Document, ToFirestoreValue, Write};

fn collection(job_id: &JobId) -> String {
    format!("jobs/{}/subtitles", job_id)
}

fn doc_id(index: u32) -> String {
    format!("{:05}", index)
}

pub struct FirestoreSubtitleStore {
    client: FirestoreClient,
}

impl FirestoreSubtitleStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn load(&self, job_id: &JobId) -> StoreResult<Vec<(Document, TranscriptSegment)>> {
        let coll = collection(job_id);
        let docs = self
            .client
            .with_retry("list_subtitles", || self.client.list_all_documents(&coll))
            .await?;
        let mut segments = docs
            .into_iter()
            .map(|doc| {
                let segment: TranscriptSegment = from_document(&doc)?;
                Ok((doc, segment))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        segments.sort_by_key(|(_, s)| s.index);
        Ok(segments)
    }

    async fn write_batches(&self, writes: Vec<Write>) -> StoreResult<()> {
        let mut writes = writes;
        while !writes.is_empty() {
            let rest = writes.split_off(writes.len().min(MAX_BATCH_WRITES));
            self.client.batch_write(writes).await?;
            writes = rest;
        }
        Ok(())
    }
}

#[async_trait]
impl SubtitleStore for FirestoreSubtitleStore {
    async fn replace_all(&self, job_id: &JobId, segments: &[TranscriptSegment]) -> StoreResult<()> {
        let mut indices: Vec<u32> = segments.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        if indices.windows(2).any(|w| w[0] == w[1]) {
            return Err(StoreError::invalid_argument("duplicate segment index"));
        }

        let coll = collection(job_id);
        let existing = self.load(job_id).await?;

        // Stale documents go first; documents that are rewritten are
        // overwritten in place by the full-document upsert.
        let mut writes: Vec<Write> = existing
            .iter()
            .filter(|(_, s)| !indices.contains(&s.index))
            .filter_map(|(doc, _)| doc.name.clone())
            .map(Write::delete)
            .collect();
        for segment in segments {
            let name = self
                .client
                .full_document_name(&coll, &doc_id(segment.index));
            writes.push(Write::upsert(name, to_fields(segment)?));
        }

        self.write_batches(writes).await?;
        info!(job_id = %job_id, segments = segments.len(), "Replaced subtitles");
        Ok(())
    }

    async fn list(&self, job_id: &JobId, only_selected: bool) -> StoreResult<Vec<TranscriptSegment>> {
        Ok(self
            .load(job_id)
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| !only_selected || s.selected)
            .collect())
    }

    async fn update_selection(&self, job_id: &JobId, selected: &[u32]) -> StoreResult<()> {
        let existing = self.load(job_id).await?;
        let unknown: Vec<u32> = selected
            .iter()
            .copied()
            .filter(|i| !existing.iter().any(|(_, s)| s.index == *i))
            .collect();
        if !unknown.is_empty() {
            return Err(StoreError::invalid_argument(format!(
                "unknown segment indices: {:?}",
                unknown
            )));
        }

        let coll = collection(job_id);
        let writes: Vec<Write> = existing
            .iter()
            .filter_map(|(_, s)| {
                let want = selected.contains(&s.index);
                (want != s.selected).then(|| {
                    let mut fields = std::collections::HashMap::new();
                    fields.insert("selected".to_string(), want.to_firestore_value());
                    Write::patch(
                        self.client.full_document_name(&coll, &doc_id(s.index)),
                        fields,
                        vec!["selected".to_string()],
                    )
                })
            })
            .collect();

        let changed = writes.len();
        self.write_batches(writes).await?;
        info!(job_id = %job_id, changed, "Updated subtitle selection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

    fn segment_doc(index: u32, selected: bool) -> serde_json::Value {
        let mut segment = TranscriptSegment::new(index, index as f64, index as f64 + 0.8, "hi");
        segment.selected = selected;
        serde_json::json!({
            "name": format!("projects/test-project/databases/(default)/documents/jobs/j1/subtitles/{:05}", index),
            "fields": to_fields(&segment).unwrap(),
        })
    }

    async fn store(server: &MockServer) -> FirestoreSubtitleStore {
        FirestoreSubtitleStore::new(
            FirestoreClient::new(FirestoreConfig::emulator("test-project", server.uri()))
                .await
                .unwrap(),
        )
    }

    async fn mount_existing(server: &MockServer, docs: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(format!("{}/jobs/j1/subtitles", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "documents": docs
            })))
            .mount(server)
            .await;
    }

    fn batch_writes(request: &Request) -> Vec<serde_json::Value> {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        body["writes"].as_array().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_list_orders_and_filters() {
        let server = MockServer::start().await;
        mount_existing(
            &server,
            vec![segment_doc(2, true), segment_doc(0, true), segment_doc(1, false)],
        )
        .await;

        let store = store(&server).await;
        let job = JobId::from_string("j1");
        let all = store.list(&job, false).await.unwrap();
        assert_eq!(all.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        let selected = store.list(&job, true).await.unwrap();
        assert_eq!(selected.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_replace_all_deletes_stale_segments() {
        let server = MockServer::start().await;
        mount_existing(&server, vec![segment_doc(0, true), segment_doc(1, true), segment_doc(2, true)]).await;
        Mock::given(method("POST"))
            .and(path(format!("{}:batchWrite", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server).await;
        let job = JobId::from_string("j1");
        store
            .replace_all(&job, &[TranscriptSegment::new(0, 0.0, 1.0, "new")])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let batch = requests
            .iter()
            .find(|r| r.url.path().ends_with(":batchWrite"))
            .unwrap();
        let writes = batch_writes(batch);
        let deletes = writes.iter().filter(|w| w.get("delete").is_some()).count();
        let updates = writes.iter().filter(|w| w.get("update").is_some()).count();
        assert_eq!(deletes, 2);
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn test_update_selection_only_writes_changes() {
        let server = MockServer::start().await;
        mount_existing(&server, vec![segment_doc(0, true), segment_doc(1, false)]).await;
        Mock::given(method("POST"))
            .and(path(format!("{}:batchWrite", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let store = store(&server).await;
        let job = JobId::from_string("j1");
        store.update_selection(&job, &[0, 1]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let batch = requests
            .iter()
            .find(|r| r.url.path().ends_with(":batchWrite"))
            .unwrap();
        let writes = batch_writes(batch);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0]["updateMask"]["fieldPaths"][0], "selected");

        assert!(matches!(
            store.update_selection(&job, &[7]).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
