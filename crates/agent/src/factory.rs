//! Execution-context resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use quill_core::BrandId;
use quill_memory::{BrandStore, StoreError, VectorIndex};
use quill_observability::ActivityLog;

use crate::agent::{AgentSettings, BrandAgent, ContentAgent};
use crate::error::ContextError;
use crate::providers::Providers;

/// File name of a brand's embedding index inside its data directory.
pub const VECTOR_FILE: &str = "vectors.json";

/// Builds the agent a job runs against.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn resolve(&self, brand_id: &BrandId) -> Result<Arc<dyn BrandAgent>, ContextError>;
}

/// Loads the brand from the repository, opens its vector index and wires the
/// shared providers.
///
/// Indexes are opened once per brand and reused, so every agent for a brand
/// sees the same in-memory view.
pub struct DefaultAgentFactory {
    store: Arc<dyn BrandStore>,
    providers: Providers,
    activity: Arc<dyn ActivityLog>,
    data_dir: Option<PathBuf>,
    settings: AgentSettings,
    indexes: Mutex<HashMap<BrandId, Arc<VectorIndex>>>,
}

impl DefaultAgentFactory {
    /// `data_dir = None` keeps every index in memory.
    pub fn new(
        store: Arc<dyn BrandStore>,
        providers: Providers,
        activity: Arc<dyn ActivityLog>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            providers,
            activity,
            data_dir,
            settings: AgentSettings::default(),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    fn index_for(&self, brand_id: &BrandId) -> Result<Arc<VectorIndex>, ContextError> {
        let mut indexes = match self.indexes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = indexes.get(brand_id) {
            return Ok(Arc::clone(index));
        }

        let index = match &self.data_dir {
            Some(dir) => VectorIndex::open(dir.join(brand_id.as_str()).join(VECTOR_FILE)).map_err(|source| {
                ContextError::Vector {
                    brand_id: brand_id.clone(),
                    source,
                }
            })?,
            None => VectorIndex::in_memory(),
        };
        let index = Arc::new(index);
        indexes.insert(brand_id.clone(), Arc::clone(&index));
        Ok(index)
    }
}

impl std::fmt::Debug for DefaultAgentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAgentFactory")
            .field("data_dir", &self.data_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentFactory for DefaultAgentFactory {
    async fn resolve(&self, brand_id: &BrandId) -> Result<Arc<dyn BrandAgent>, ContextError> {
        let brand = self.store.get_brand(brand_id).await.map_err(|err| match err {
            StoreError::NotFound(_) => ContextError::BrandNotFound(brand_id.clone()),
            source => ContextError::Store {
                brand_id: brand_id.clone(),
                source,
            },
        })?;

        let index = self.index_for(brand_id)?;
        let agent = ContentAgent::new(
            brand,
            Arc::clone(&self.store),
            index,
            self.providers.clone(),
            Arc::clone(&self.activity),
        )
        .with_settings(self.settings);

        Ok(Arc::new(agent))
    }
}

#[cfg(test)]
mod tests {
    use quill_core::BrandProfile;
    use quill_memory::{FileBrandStore, InMemoryBrandStore, VectorRecord};
    use quill_observability::NoopActivityLog;

    use super::*;

    #[tokio::test]
    async fn unknown_brand_is_a_context_error() {
        let factory = DefaultAgentFactory::new(
            Arc::new(InMemoryBrandStore::new()),
            Providers::mock(),
            Arc::new(NoopActivityLog),
            None,
        );
        let Err(err) = factory.resolve(&BrandId::parse("ghost").unwrap()).await else {
            panic!("unknown brand resolved");
        };
        assert!(matches!(err, ContextError::BrandNotFound(_)));
        assert_eq!(err.to_string(), "brand ghost not found");
    }

    #[tokio::test]
    async fn resolves_brand_with_its_own_vector_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileBrandStore::new(dir.path()));
        let acme = BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme").with_topics(["AI"]);
        store.save_brand(&acme).await.unwrap();

        let seeded = VectorIndex::open(dir.path().join("acme").join(VECTOR_FILE)).unwrap();
        seeded.add(VectorRecord::new("old", vec![1.0, 0.0])).unwrap();
        drop(seeded);

        let factory = DefaultAgentFactory::new(store, Providers::mock(), Arc::new(NoopActivityLog), Some(dir.path().to_path_buf()));
        let agent = factory.resolve(&acme.id).await.unwrap();
        assert_eq!(agent.brand().name, "Acme");

        let index = factory.index_for(&acme.id).unwrap();
        assert_eq!(index.len(), 1);
        assert!(Arc::ptr_eq(&index, &factory.index_for(&acme.id).unwrap()));
    }

    #[tokio::test]
    async fn corrupt_vector_file_is_a_context_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileBrandStore::new(dir.path()));
        let acme = BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme");
        store.save_brand(&acme).await.unwrap();
        std::fs::write(dir.path().join("acme").join(VECTOR_FILE), b"[{").unwrap();

        let factory = DefaultAgentFactory::new(store, Providers::mock(), Arc::new(NoopActivityLog), Some(dir.path().to_path_buf()));
        let Err(err) = factory.resolve(&acme.id).await else {
            panic!("corrupt vector file accepted");
        };
        assert!(matches!(err, ContextError::Vector { .. }));
    }
}
