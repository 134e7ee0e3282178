//! Shared application state used across the API and the scheduler.
//!
//! One `SharedState` wires every service together; the web API and the
//! background scheduler both hold an `Arc` of it.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::ai::AiMatcherManager;
use crate::config::Config;
use crate::config_store::ConfigStore;
use crate::danmaku::DanmakuStore;
use crate::db::Store;
use crate::image::ImageService;
use crate::metadata::{MetadataRegistry, tmdb::TmdbClient};
use crate::rate_limiter::RateLimiter;
use crate::recognition::TitleRecognizer;
use crate::scrapers::{Scraper, ScraperRegistry, custom::CustomScraper};
use crate::search::SearchPipeline;
use crate::tasks::auto_import::AutoImporter;
use crate::tasks::import::ImportEngine;
use crate::tasks::manual::ManualImporter;
use crate::tasks::TaskManager;
use crate::webhook::WebhookDispatcher;

#[derive(Clone)]
pub struct SharedState {
    /// Bootstrap configuration (wrapped for runtime reads).
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    /// Read-through cache over the runtime config table.
    pub config_store: ConfigStore,

    pub scrapers: Arc<ScraperRegistry>,

    pub metadata: Arc<MetadataRegistry>,

    pub recognizer: Arc<TitleRecognizer>,

    pub ai: Arc<AiMatcherManager>,

    pub rate_limiter: Arc<RateLimiter>,

    pub search_pipeline: Arc<SearchPipeline>,

    pub task_manager: Arc<TaskManager>,

    pub import_engine: ImportEngine,

    pub auto_importer: Arc<AutoImporter>,

    pub manual_importer: Arc<ManualImporter>,

    pub webhook_dispatcher: WebhookDispatcher,

    pub danmaku: DanmakuStore,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::new(&config.general.database_url).await?;
        let data_dir = PathBuf::from(&config.general.data_dir);

        let config_store = ConfigStore::new(store.clone());
        config_store.register_defaults().await?;

        let recognizer = Arc::new(TitleRecognizer::new());
        if let Some(rules) = store.load_recognition_rules().await? {
            let warnings = recognizer.update_rules(&rules);
            for warning in warnings {
                warn!("Recognition rule warning: {}", warning);
            }
        }

        let scraper_list: Vec<Arc<dyn Scraper>> = vec![Arc::new(CustomScraper)];
        for (order, scraper) in scraper_list.iter().enumerate() {
            store
                .ensure_scraper_setting(scraper.provider_name(), i32::try_from(order).unwrap_or(0))
                .await?;
        }
        let scrapers = Arc::new(ScraperRegistry::new(scraper_list));

        let tmdb = Arc::new(TmdbClient::new(config_store.clone()));
        let metadata = Arc::new(MetadataRegistry::new(
            vec![tmdb.clone() as Arc<dyn crate::metadata::MetadataSource>],
            config_store.clone(),
        ));

        let ai = Arc::new(AiMatcherManager::new(config_store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            store.clone(),
            scrapers.clone(),
            &data_dir.join("rate_limit"),
        ));

        let danmaku = DanmakuStore::new(&data_dir);
        let images = ImageService::new(&data_dir);

        let import_engine = ImportEngine::new(
            store.clone(),
            config_store.clone(),
            scrapers.clone(),
            rate_limiter.clone(),
            recognizer.clone(),
            danmaku.clone(),
            images,
        );

        let search_pipeline = Arc::new(SearchPipeline::new(
            store.clone(),
            config_store.clone(),
            scrapers.clone(),
            metadata.clone(),
            recognizer.clone(),
            ai.clone(),
        ));

        let task_manager = TaskManager::start(store.clone(), config_store.clone()).await?;

        let auto_importer = Arc::new(AutoImporter::new(
            store.clone(),
            config_store.clone(),
            import_engine.clone(),
            search_pipeline.clone(),
            scrapers.clone(),
            metadata.clone(),
            ai.clone(),
            recognizer.clone(),
            rate_limiter.clone(),
            tmdb,
        ));

        let manual_importer = Arc::new(ManualImporter::new(
            store.clone(),
            scrapers.clone(),
            rate_limiter.clone(),
            danmaku.clone(),
        ));

        let webhook_dispatcher = WebhookDispatcher::new(
            store.clone(),
            config_store.clone(),
            task_manager.clone(),
            import_engine.clone(),
            scrapers.clone(),
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            config_store,
            scrapers,
            metadata,
            recognizer,
            ai,
            rate_limiter,
            search_pipeline,
            task_manager,
            import_engine,
            auto_importer,
            manual_importer,
            webhook_dispatcher,
            danmaku,
        })
    }
}
