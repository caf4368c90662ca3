//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::{ModelSource, ServiceConfig};
use crate::error::ModelError;
use crate::keras_config::{load_any_model, ModelSpec};
use crate::labels::{LabelCatalog, ModelKind};
use crate::model::{Classifier, TfClassifier};

/// A loaded model with everything needed to answer a request.
#[derive(Clone)]
pub struct ServedModel {
    pub kind: ModelKind,
    pub spec: ModelSpec,
    pub catalog: LabelCatalog,
    pub classifier: Arc<dyn Classifier>,
}

impl ServedModel {
    pub fn new(
        kind: ModelKind,
        spec: ModelSpec,
        catalog: LabelCatalog,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, ModelError> {
        if let Some(units) = spec.num_classes {
            if units != catalog.len() {
                return Err(ModelError::OutputMismatch {
                    expected: catalog.len(),
                    got: units,
                });
            }
        }

        Ok(Self {
            kind,
            spec,
            catalog,
            classifier,
        })
    }

    /// Load the graph, architecture config and labels described by `source`.
    pub fn load(source: &ModelSource, config: &ServiceConfig) -> Result<Self, ModelError> {
        let spec = if source.config_path.exists() {
            load_any_model(&source.config_path)?
        } else {
            warn!(
                model = %source.kind,
                path = %source.config_path.display(),
                "no model config found, assuming 224x224 RGB input"
            );
            ModelSpec::default()
        };

        let catalog = match &source.class_list_path {
            Some(path) => LabelCatalog::from_class_list(path)?,
            None => LabelCatalog::builtin(source.kind),
        };

        let classifier =
            TfClassifier::load(&source.model_path, &config.input_op, &config.output_op)?;

        info!(
            model = %source.kind,
            name = %spec.name,
            height = spec.height,
            width = spec.width,
            classes = catalog.len(),
            "model ready"
        );

        Self::new(source.kind, spec, catalog, Arc::new(classifier))
    }
}

pub struct AppState {
    pub fruit: ServedModel,
    pub leaf: ServedModel,
    pub include_treatment: bool,
    /// Hide server error details from clients.
    pub production: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(fruit: ServedModel, leaf: ServedModel, include_treatment: bool) -> Self {
        Self {
            fruit,
            leaf,
            include_treatment,
            production: false,
            started_at: Instant::now(),
        }
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn load(config: &ServiceConfig) -> Result<Self, ModelError> {
        let fruit = ServedModel::load(&config.fruit, config)?;
        let leaf = ServedModel::load(&config.leaf, config)?;
        Ok(Self::new(fruit, leaf, config.include_treatment).with_production(config.is_production()))
    }

    pub fn model(&self, kind: ModelKind) -> &ServedModel {
        match kind {
            ModelKind::Fruit => &self.fruit,
            ModelKind::Leaf => &self.leaf,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
