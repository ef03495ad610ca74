use std::sync::Arc;

use thiserror::Error;

use crate::db::RecordStore;
use crate::factors::attribute;
use crate::generator::{self, ChatReply};
use crate::lifecycle::{ModelUnavailable, Models};
use crate::models::{AssessmentResult, FeatureVector};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(#[from] ModelUnavailable),
}

/// Classify, attribute, persist. Augmentation runs separately through
/// `explain` and `chat` so a slow generator never holds up a prediction.
#[derive(Clone)]
pub struct AssessmentPipeline {
    models: Arc<Models>,
    store: Arc<dyn RecordStore>,
}

impl AssessmentPipeline {
    pub fn new(models: Arc<Models>, store: Arc<dyn RecordStore>) -> Self {
        Self { models, store }
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub async fn assess(&self, features: &FeatureVector) -> Result<AssessmentResult, PipelineError> {
        let classifier = self.models.classifier()?;
        let (class_id, label) = classifier.classify(features);
        tracing::debug!(class_id, label = %label, "classified");

        let factors = attribute(features);
        tracing::debug!(factors = ?factors, "attributed");

        let result = AssessmentResult {
            class_id,
            label,
            factors,
        };

        // Persistence is best-effort; the caller still gets the result.
        match self.store.save(features, &result).await {
            Ok(id) => tracing::info!(record_id = id, label = %label, "assessment saved"),
            Err(err) => tracing::error!(error = %err, "failed to save assessment"),
        }

        Ok(result)
    }

    pub async fn explain(&self, label: &str, factors: &[String]) -> String {
        generator::explain(self.models.generator().ok(), label, factors).await
    }

    pub async fn chat(&self, message: &str, history: &[String]) -> ChatReply {
        generator::chat(self.models.generator().ok(), message, history).await
    }
}
