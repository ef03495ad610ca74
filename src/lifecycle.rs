use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::classifier::{ClassifierAdapter, ForestClassifier, StressClassifier};
use crate::generator::{OllamaGenerator, TextGenerator};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelUnavailable {
    #[error("stress classifier is not loaded")]
    Classifier,

    #[error("text generator is not loaded")]
    Generator,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub classifier_path: PathBuf,
    pub generator_url: Option<String>,
    pub generator_model: String,
}

/// Model handles for the whole process. Built once before the server starts
/// accepting requests and never mutated afterwards.
#[derive(Clone, Default)]
pub struct Models {
    classifier: Option<ClassifierAdapter>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Models {
    pub fn new(
        classifier: Option<Arc<dyn StressClassifier>>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            classifier: classifier.map(ClassifierAdapter::new),
            generator,
        }
    }

    /// Loads both capabilities. A failed load is logged and leaves that
    /// handle empty; startup continues either way.
    pub async fn load(config: &ModelConfig) -> Self {
        let classifier: Option<Arc<dyn StressClassifier>> =
            match ForestClassifier::load(&config.classifier_path) {
                Ok(forest) => {
                    tracing::info!(
                        path = %config.classifier_path.display(),
                        version = forest.version(),
                        trees = forest.tree_count(),
                        classes = ?forest.classes(),
                        "stress classifier loaded"
                    );
                    Some(Arc::new(forest))
                }
                Err(err) => {
                    tracing::error!(
                        path = %config.classifier_path.display(),
                        error = %err,
                        "failed to load stress classifier"
                    );
                    None
                }
            };

        let generator: Option<Arc<dyn TextGenerator>> = match &config.generator_url {
            None => {
                tracing::info!("text generator disabled");
                None
            }
            Some(url) => match OllamaGenerator::connect(url.as_str(), config.generator_model.as_str()).await {
                Ok(generator) => {
                    tracing::info!(url = %url, model = generator.model(), "text generator loaded");
                    Some(Arc::new(generator))
                }
                Err(err) => {
                    tracing::error!(url = %url, error = %err, "failed to load text generator");
                    None
                }
            },
        };

        Self::new(classifier, generator)
    }

    pub fn classifier(&self) -> Result<&ClassifierAdapter, ModelUnavailable> {
        self.classifier.as_ref().ok_or(ModelUnavailable::Classifier)
    }

    pub fn generator(&self) -> Result<&dyn TextGenerator, ModelUnavailable> {
        self.generator
            .as_deref()
            .ok_or(ModelUnavailable::Generator)
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }
}
