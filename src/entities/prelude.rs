pub use super::anime::Entity as Anime;
pub use super::anime_alias::Entity as AnimeAlias;
pub use super::anime_metadata::Entity as AnimeMetadata;
pub use super::anime_source::Entity as AnimeSource;
pub use super::cache::Entity as Cache;
pub use super::config::Entity as Config;
pub use super::episode::Entity as Episode;
pub use super::external_api_log::Entity as ExternalApiLog;
pub use super::rate_limit_state::Entity as RateLimitState;
pub use super::scheduler_task::Entity as SchedulerTask;
pub use super::scraper_setting::Entity as ScraperSetting;
pub use super::task_history::Entity as TaskHistory;
pub use super::title_recognition::Entity as TitleRecognition;
pub use super::webhook_queue::Entity as WebhookQueue;
