//! Firestore-backed story store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use storyvox_models::{AnalysisState, Story, StoryAnalysis, StoryId};

use crate::client::FirestoreClient;
use crate::contract::StoryStore;
use crate::metrics::record_analysis_state;
use crate::error::StoreResult;
use crate::types::{from_document, json_to_value, to_fields, Precondition, ToFirestoreValue, Value};

const COLLECTION: &str = "stories";

pub struct FirestoreStoryStore {
    client: FirestoreClient,
}

impl FirestoreStoryStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Masked write to an existing story.
    async fn patch(&self, id: &StoryId, fields: HashMap<String, Value>, mask: &[&str]) -> StoreResult<()> {
        let mask: Vec<String> = mask.iter().map(|m| m.to_string()).collect();
        self.client
            .patch_document(
                COLLECTION,
                id.as_str(),
                fields,
                &mask,
                Some(&Precondition::exists()),
            )
            .await?;
        Ok(())
    }
}

fn state_fields(state: AnalysisState) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("analysis_state".to_string(), state.as_str().to_firestore_value());
    fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());
    fields
}

#[async_trait]
impl StoryStore for FirestoreStoryStore {
    async fn get_story(&self, id: &StoryId) -> StoreResult<Option<Story>> {
        let doc = self
            .client
            .with_retry("get_story", || self.client.get_document(COLLECTION, id.as_str()))
            .await?;
        doc.as_ref().map(from_document).transpose()
    }

    async fn put_story(&self, story: &Story) -> StoreResult<()> {
        let mut fields = to_fields(story)?;
        fields.insert("updated_at".to_string(), story.updated_at.to_firestore_value());
        self.client
            .patch_document(COLLECTION, story.id.as_str(), fields, &[], None)
            .await?;
        Ok(())
    }

    async fn set_analysis_state(&self, id: &StoryId, state: AnalysisState) -> StoreResult<()> {
        let mut mask = vec!["analysis_state", "updated_at"];
        if state.is_active() {
            // Absent from the body, so the mask clears it
            mask.push("analysis_error");
        }
        self.patch(id, state_fields(state), &mask).await?;
        record_analysis_state(state);
        info!(story_id = %id, state = %state, "Analysis state changed");
        Ok(())
    }

    async fn save_analysis(&self, id: &StoryId, analysis: &StoryAnalysis) -> StoreResult<()> {
        let mut fields = state_fields(AnalysisState::Completed);
        fields.insert(
            "analysis".to_string(),
            json_to_value(&serde_json::to_value(analysis)?),
        );
        self.patch(
            id,
            fields,
            &["analysis", "analysis_state", "analysis_error", "updated_at"],
        )
        .await?;
        record_analysis_state(AnalysisState::Completed);
        info!(story_id = %id, speakers = analysis.speakers.len(), "Saved story analysis");
        Ok(())
    }

    async fn fail_analysis(&self, id: &StoryId, error: &str) -> StoreResult<()> {
        let mut fields = state_fields(AnalysisState::Failed);
        fields.insert("analysis_error".to_string(), error.to_firestore_value());
        self.patch(id, fields, &["analysis_state", "analysis_error", "updated_at"])
            .await?;
        record_analysis_state(AnalysisState::Failed);
        Ok(())
    }
}
