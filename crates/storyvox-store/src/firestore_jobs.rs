//! Firestore-backed job store.
//!
//! Jobs live in `jobs/{job_id}`. Status and generic field writes are
//! read-modify-write cycles guarded by the document's `updateTime`, so two
//! writers racing on one job never lose an update or resurrect a terminal job.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use storyvox_models::{Job, JobId, JobPage, JobStatus, StatusUpdate};

use crate::client::FirestoreClient;
use crate::contract::{apply_field_writes, check_writable, get_json_path, set_json_path, JobStore};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_conflict, record_job_status};
use crate::types::{
    from_document, json_to_value, Document, Precondition, StructuredQuery, ToFirestoreValue,
    Value,
};

const COLLECTION: &str = "jobs";

/// Attempts at a read-modify-write before giving up on contention.
const MAX_CONFLICT_RETRIES: u32 = 5;

/// Fields stored as Firestore timestamps rather than strings.
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "updated_at", "started_at", "completed_at"];

/// Fields written by a status update.
const STATUS_FIELDS: &[&str] = &[
    "status",
    "step",
    "progress",
    "error",
    "started_at",
    "completed_at",
    "updated_at",
];

/// Fields written by completion.
const COMPLETION_FIELDS: &[&str] = &[
    "status",
    "step",
    "progress",
    "final_video_url",
    "completed_at",
    "updated_at",
];

/// Quote a dotted field path for an update mask.
///
/// Segments that are not plain identifiers are wrapped in backticks.
pub fn quote_field_path(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            let simple = segment
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false)
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if simple {
                segment.to_string()
            } else {
                format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn mark_timestamps(fields: &mut HashMap<String, Value>) {
    for name in TIMESTAMP_FIELDS {
        if let Some(Value::StringValue(s)) = fields.get(*name) {
            let ts = Value::TimestampValue(s.clone());
            fields.insert((*name).to_string(), ts);
        }
    }
}

/// Serialize a full job document.
pub fn job_to_fields(job: &Job) -> StoreResult<HashMap<String, Value>> {
    let mut fields = crate::types::to_fields(job)?;
    mark_timestamps(&mut fields);
    Ok(fields)
}

/// Fields and mask for writing `paths` of `job`.
///
/// Paths missing from the serialized job are left out of the body, which
/// deletes them on the server.
fn masked_fields(job: &Job, paths: &[String]) -> StoreResult<(HashMap<String, Value>, Vec<String>)> {
    let json = serde_json::to_value(job)?;
    let mut subset = serde_json::Value::Object(serde_json::Map::new());
    for path in paths {
        if let Some(value) = get_json_path(&json, path) {
            if !value.is_null() {
                set_json_path(&mut subset, path, value.clone())?;
            }
        }
    }

    let mut fields: HashMap<String, Value> = subset
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect())
        .unwrap_or_default();
    mark_timestamps(&mut fields);

    let mask = paths.iter().map(|p| quote_field_path(p)).collect();
    Ok((fields, mask))
}

/// Repository for generation jobs.
pub struct FirestoreJobStore {
    client: FirestoreClient,
}

impl FirestoreJobStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn get_document(&self, id: &JobId) -> StoreResult<Option<Document>> {
        self.client
            .with_retry("get_job", || self.client.get_document(COLLECTION, id.as_str()))
            .await
    }

    /// Read the job, apply `modify`, and write back `paths` if nobody else
    /// wrote in between.
    async fn read_modify_write<F>(&self, id: &JobId, paths: &[String], modify: F) -> StoreResult<()>
    where
        F: Fn(&Job) -> StoreResult<Job>,
    {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let doc = self
                .get_document(id)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", COLLECTION, id)))?;
            let current: Job = from_document(&doc)?;
            let updated = modify(&current)?;
            let (fields, mask) = masked_fields(&updated, paths)?;

            let precondition = doc
                .update_time
                .as_deref()
                .map(Precondition::updated_at)
                .unwrap_or_else(Precondition::exists);

            match self
                .client
                .patch_document(COLLECTION, id.as_str(), fields, &mask, Some(&precondition))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_precondition_failed() => {
                    record_conflict(COLLECTION);
                    debug!(job_id = %id, attempt, "Job changed concurrently, retrying write");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(job_id = %id, "Giving up on contended job write");
        Err(StoreError::PreconditionFailed(format!(
            "{}/{} kept changing during update",
            COLLECTION, id
        )))
    }
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

#[async_trait]
impl JobStore for FirestoreJobStore {
    async fn create(&self, job: &Job) -> StoreResult<JobId> {
        self.client
            .create_document(COLLECTION, job.id.as_str(), job_to_fields(job)?)
            .await?;
        info!(job_id = %job.id, owner = %job.owner, "Created job");
        Ok(job.id.clone())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        match self.get_document(id).await? {
            Some(doc) => Ok(Some(from_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: &JobId, update: &StatusUpdate) -> StoreResult<()> {
        self.read_modify_write(id, &owned(STATUS_FIELDS), |job| {
            let mut job = job.clone();
            job.apply_status(update)
                .map_err(StoreError::InvalidTransition)?;
            Ok(job)
        })
        .await?;
        record_job_status(update.status);
        Ok(())
    }

    async fn update_field(
        &self,
        id: &JobId,
        name: &str,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert(name.to_string(), value);
        self.update_fields(id, fields).await
    }

    async fn update_fields(
        &self,
        id: &JobId,
        fields: HashMap<String, serde_json::Value>,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        for name in fields.keys() {
            check_writable(name)?;
        }
        let mut paths: Vec<String> = fields.keys().cloned().collect();
        paths.push("updated_at".to_string());
        self.read_modify_write(id, &paths, |job| apply_field_writes(job, &fields))
            .await
    }

    async fn list_by_owner(&self, owner: &str, page: u32, page_size: u32) -> StoreResult<JobPage> {
        if page == 0 || page_size == 0 {
            return Err(StoreError::invalid_argument(
                "page and page_size must be at least 1",
            ));
        }
        let filtered =
            StructuredQuery::collection(COLLECTION).filter_eq("owner", owner.to_firestore_value());

        let query = filtered
            .clone()
            .order_by("created_at", true)
            .offset((page - 1).saturating_mul(page_size))
            .limit(page_size);
        let docs = self
            .client
            .with_retry("list_jobs", || self.client.run_query("", query.clone()))
            .await?;
        let total = self
            .client
            .with_retry("count_jobs", || self.client.run_count("", filtered.clone()))
            .await?;

        let items = docs
            .iter()
            .map(from_document)
            .collect::<StoreResult<Vec<Job>>>()?;
        Ok(JobPage {
            items,
            total,
            page,
            page_size,
        })
    }

    async fn complete(&self, id: &JobId, final_video_url: &str) -> StoreResult<()> {
        self.read_modify_write(id, &owned(COMPLETION_FIELDS), |job| {
            let mut job = job.clone();
            job.apply_completion(final_video_url)
                .map_err(StoreError::InvalidTransition)?;
            Ok(job)
        })
        .await?;
        record_job_status(JobStatus::Completed);
        info!(job_id = %id, "Job completed");
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus, limit: u32) -> StoreResult<Vec<Job>> {
        let query = StructuredQuery::collection(COLLECTION)
            .filter_eq("status", status.as_str().to_firestore_value())
            .order_by("created_at", false)
            .limit(limit);
        let docs = self
            .client
            .with_retry("list_jobs_by_status", || {
                self.client.run_query("", query.clone())
            })
            .await?;
        docs.iter().map(from_document).collect()
    }
}
