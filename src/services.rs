//! Dependency construction.
//!
//! Everything the orchestrator talks to is built here, once, and handed
//! down explicitly. Optional clients (web search, external catalog, hosted
//! language model) are `None`/offline when their secrets are not set.

use crate::capabilities::standard_registry;
use crate::capability::CapabilityRegistry;
use crate::clients::{ExternalCatalog, OpenDomainSearch, SpotifyCatalog, TavilySearch};
use crate::config::RuntimeConfig;
use crate::db::{Library, PersonalData};
use crate::index::EmbeddingIndex;
use crate::llm::{LanguageModel, OfflineModel, OpenAiChatModel};
use crate::orchestrator::Orchestrator;
use crate::recommend::RecommendationEngine;
use anyhow::Result;
use log::info;
use std::sync::Arc;

pub struct Services {
    pub config: RuntimeConfig,
    pub index: Arc<EmbeddingIndex>,
    pub engine: Arc<RecommendationEngine>,
    pub library: Arc<dyn PersonalData>,
    pub search: Option<Arc<dyn OpenDomainSearch>>,
    pub catalog: Option<Arc<dyn ExternalCatalog>>,
    pub model: Arc<dyn LanguageModel>,
}

impl Services {
    /// Build every service from `config`.
    ///
    /// The catalog is indexed eagerly; a missing or empty catalog yields an
    /// empty index rather than an error.
    ///
    /// # Errors
    ///
    /// Fails when the library cannot be opened or an HTTP client cannot be built.
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let index = Arc::new(EmbeddingIndex::load_or_empty(&config.catalog_path, &config.index));
        info!(
            "Indexed {} catalog entities ({} dimensions)",
            index.len(),
            index.dim()
        );

        let library: Arc<dyn PersonalData> = Arc::new(Library::open(&config.db_path)?);
        let search = TavilySearch::from_config(&config.search)?
            .map(|s| Arc::new(s) as Arc<dyn OpenDomainSearch>);
        let catalog = SpotifyCatalog::from_config(&config.search)?
            .map(|c| Arc::new(c) as Arc<dyn ExternalCatalog>);
        let model: Arc<dyn LanguageModel> = match OpenAiChatModel::from_config(&config.llm)? {
            Some(model) => Arc::new(model),
            None => Arc::new(OfflineModel),
        };

        Ok(Self::new(config, index, library, search, catalog, model))
    }

    /// Assemble services from already-built parts.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        index: Arc<EmbeddingIndex>,
        library: Arc<dyn PersonalData>,
        search: Option<Arc<dyn OpenDomainSearch>>,
        catalog: Option<Arc<dyn ExternalCatalog>>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let engine = Arc::new(RecommendationEngine::new(Arc::clone(&index)));
        Self {
            config,
            index,
            engine,
            library,
            search,
            catalog,
            model,
        }
    }

    #[must_use]
    pub fn registry(&self) -> CapabilityRegistry {
        standard_registry(
            Arc::clone(&self.engine),
            Arc::clone(&self.library),
            self.search.clone(),
            self.catalog.clone(),
            self.config.orchestrator.default_count,
            self.config.orchestrator.tool_timeout(),
        )
    }

    #[must_use]
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::new(self.registry()),
            Arc::clone(&self.model),
            self.config.orchestrator.clone(),
        )
    }
}
