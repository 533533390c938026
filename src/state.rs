//! Process-wide state shared by the request path and the background job.
//!
//! Locks are `std::sync` and are never held across an `.await`.

use std::sync::{Arc, RwLock};

use crate::cache::AnalysisCache;
use crate::config::ModelConfig;
use crate::dataset::Dataset;
use crate::error::{AnalystError, Result};
use crate::knowledge::AcronymTable;

#[derive(Debug, Default)]
struct Loaded {
    dataset: Option<Arc<Dataset>>,
    machine_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct AppState {
    loaded: RwLock<Loaded>,
    acronyms: Arc<AcronymTable>,
    cache: Arc<AnalysisCache>,
    model: Arc<RwLock<ModelConfig>>,
}

impl AppState {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model: Arc::new(RwLock::new(model)),
            ..Self::default()
        }
    }

    /// Replace the active dataset wholesale.
    pub fn set_dataset(&self, dataset: Dataset, machine_name: Option<String>) -> Arc<Dataset> {
        let dataset = Arc::new(dataset);
        let mut loaded = self.loaded.write().unwrap_or_else(|p| p.into_inner());
        loaded.dataset = Some(Arc::clone(&dataset));
        loaded.machine_name = machine_name;
        dataset
    }

    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.loaded.read().unwrap_or_else(|p| p.into_inner()).dataset.clone()
    }

    pub fn require_dataset(&self) -> Result<Arc<Dataset>> {
        self.dataset().ok_or(AnalystError::NoDataset)
    }

    pub fn machine_name(&self) -> Option<String> {
        self.loaded.read().unwrap_or_else(|p| p.into_inner()).machine_name.clone()
    }

    pub fn acronyms(&self) -> &Arc<AcronymTable> {
        &self.acronyms
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    /// Shared handle read by every generation call.
    pub fn model_handle(&self) -> Arc<RwLock<ModelConfig>> {
        Arc::clone(&self.model)
    }

    pub fn model(&self) -> ModelConfig {
        self.model.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn update_model<R>(&self, f: impl FnOnce(&mut ModelConfig) -> R) -> R {
        let mut model = self.model.write().unwrap_or_else(|p| p.into_inner());
        f(&mut model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;

    #[test]
    fn test_dataset_slot_replaced() {
        let state = AppState::default();
        assert!(matches!(state.require_dataset(), Err(AnalystError::NoDataset)));

        let a = Dataset::builder().numeric("x", vec![1.0]).build().unwrap();
        let b = Dataset::builder().numeric("y", vec![1.0, 2.0]).build().unwrap();
        state.set_dataset(a, Some("Lathe 3".into()));
        state.set_dataset(b, None);

        let current = state.require_dataset().unwrap();
        assert_eq!(current.column_names(), ["y"]);
        assert_eq!(state.machine_name(), None);
    }

    #[test]
    fn test_model_updates_visible_through_handle() {
        let state = AppState::new(ModelConfig::default());
        let handle = state.model_handle();
        state.update_model(|m| m.backend = Provider::Anthropic);
        assert_eq!(handle.read().unwrap().backend, Provider::Anthropic);
    }
}
