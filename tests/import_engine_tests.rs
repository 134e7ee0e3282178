//! Import-engine invariants driven through the task manager against an
//! in-process mock provider and a real sqlite store.

use async_trait::async_trait;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use sea_orm::EntityTrait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use danmarr::config_store::ConfigStore;
use danmarr::danmaku::DanmakuStore;
use danmarr::db::Store;
use danmarr::image::ImageService;
use danmarr::models::danmaku::Comment;
use danmarr::models::media::{MediaType, ProviderEpisodeInfo, ProviderSearchInfo};
use danmarr::rate_limiter::RateLimiter;
use danmarr::recognition::TitleRecognizer;
use danmarr::scrapers::{EpisodeSearchHint, ProgressSink, Scraper, ScraperRegistry};
use danmarr::tasks::import::{GenericImportRequest, ImportEngine, import_task};
use danmarr::tasks::{SubmitError, TaskManager};

/// Matches the limiter's embedded deobfuscation key; operators producing
/// policy files use the same bytes.
const XOR_KEY: &[u8] =
    b"T3Nn@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S";

struct MockScraper {
    episodes: Vec<ProviderEpisodeInfo>,
    comments: HashMap<String, Vec<Comment>>,
    comment_calls: AtomicUsize,
    fetch_delay: Option<Duration>,
}

impl MockScraper {
    fn new(episode_count: i32, comments_per_episode: usize) -> Self {
        let episodes = (1..=episode_count)
            .map(|i| ProviderEpisodeInfo {
                provider: "mock".to_string(),
                episode_id: format!("ep-{i}"),
                title: format!("第 {i} 集"),
                episode_index: i,
                url: None,
            })
            .collect::<Vec<_>>();

        let comments = episodes
            .iter()
            .map(|e| {
                let list = (0..comments_per_episode)
                    .map(|n| Comment::new(f64::from(n as u32), "1,1,25,16777215", format!("c{n}")))
                    .collect();
                (e.episode_id.clone(), list)
            })
            .collect();

        Self {
            episodes,
            comments,
            comment_calls: AtomicUsize::new(0),
            fetch_delay: None,
        }
    }

    fn without_comments(episode_count: i32) -> Self {
        let mut mock = Self::new(episode_count, 0);
        mock.comments.clear();
        mock
    }
}

#[async_trait]
impl Scraper for MockScraper {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    async fn search(
        &self,
        _titles: &[String],
        _hint: EpisodeSearchHint,
    ) -> anyhow::Result<Vec<ProviderSearchInfo>> {
        Ok(Vec::new())
    }

    async fn get_episodes(
        &self,
        _media_id: &str,
        _target_episode: Option<i32>,
        _db_media_type: Option<MediaType>,
    ) -> anyhow::Result<Vec<ProviderEpisodeInfo>> {
        Ok(self.episodes.clone())
    }

    async fn get_comments(
        &self,
        episode_id: &str,
        _progress: Option<&ProgressSink>,
    ) -> anyhow::Result<Option<Vec<Comment>>> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.comments.get(episode_id).cloned())
    }
}

fn write_policy_files(dir: &Path, policy_json: &str) {
    std::fs::create_dir_all(dir).unwrap();

    let obfuscated: Vec<u8> = policy_json
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ XOR_KEY[i % XOR_KEY.len()])
        .collect();

    let signing_key = SigningKey::from_bytes(&[42u8; 32]);
    let digest_hex: String = Sha256::digest(&obfuscated)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    let signature = signing_key.sign(digest_hex.as_bytes());

    let mut der = vec![0u8; 12];
    der.extend_from_slice(signing_key.verifying_key().as_bytes());
    let pem = format!(
        "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
        base64::engine::general_purpose::STANDARD.encode(&der)
    );

    std::fs::write(dir.join("rate_limit.bin"), &obfuscated).unwrap();
    std::fs::write(
        dir.join("rate_limit.bin.sig"),
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
    )
    .unwrap();
    std::fs::write(dir.join("public_key.pem"), pem).unwrap();
}

struct Harness {
    store: Store,
    engine: ImportEngine,
    manager: Arc<TaskManager>,
    scraper: Arc<MockScraper>,
    _data_dir: PathBuf,
}

async fn harness(scraper: MockScraper, policy_json: &str, tamper: bool) -> Harness {
    let run_id = uuid::Uuid::new_v4();
    let db_path = std::env::temp_dir().join(format!("danmarr-engine-test-{run_id}.db"));
    let data_dir = std::env::temp_dir().join(format!("danmarr-engine-test-{run_id}"));

    let policy_dir = data_dir.join("rate_limit");
    write_policy_files(&policy_dir, policy_json);
    if tamper {
        let path = policy_dir.join("rate_limit.bin");
        let mut blob = std::fs::read(&path).unwrap();
        blob[0] ^= 0x01;
        std::fs::write(&path, blob).unwrap();
    }

    let store = Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .unwrap();
    let config = ConfigStore::new(store.clone());
    config.register_defaults().await.unwrap();

    let scraper = Arc::new(scraper);
    store.ensure_scraper_setting("mock", 0).await.unwrap();
    let registry = Arc::new(ScraperRegistry::new(vec![scraper.clone() as Arc<dyn Scraper>]));

    let rate_limiter = Arc::new(RateLimiter::new(store.clone(), registry.clone(), &policy_dir));
    let engine = ImportEngine::new(
        store.clone(),
        config.clone(),
        registry,
        rate_limiter,
        Arc::new(TitleRecognizer::new()),
        DanmakuStore::new(&data_dir),
        ImageService::new(&data_dir),
    );
    let manager = TaskManager::start(store.clone(), config).await.unwrap();

    Harness {
        store,
        engine,
        manager,
        scraper,
        _data_dir: data_dir,
    }
}

fn request(title: &str) -> GenericImportRequest {
    GenericImportRequest {
        provider: "mock".to_string(),
        media_id: "m-1".to_string(),
        title: title.to_string(),
        media_type: MediaType::TvSeries,
        season: 1,
        year: Some(2024),
        image_url: None,
        episode_index: None,
        selected_episodes: None,
        metadata_ids: Default::default(),
        fallback: None,
        preassigned_anime_id: None,
        incremental_refresh_source_id: None,
        smart_refresh: false,
    }
}

async fn run_to_terminal(harness: &Harness, req: GenericImportRequest, unique_key: &str) -> (String, String) {
    let task_id = harness
        .manager
        .submit(
            import_task(&harness.engine, req),
            "测试导入",
            Some(unique_key),
            "generic_import",
            None,
            None,
        )
        .await
        .unwrap();

    for _ in 0..600 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = harness.store.get_task(&task_id).await.unwrap().unwrap();
        if matches!(task.status.as_str(), "completed" | "failed" | "cancelled") {
            return (task.status, task.message);
        }
    }
    panic!("task {task_id} never reached a terminal state");
}

const OPEN_POLICY: &str = r#"{"enabled":true,"global_limit":1000,"global_period":"hour"}"#;

#[tokio::test]
async fn validation_failure_creates_no_rows() {
    let harness = harness(MockScraper::without_comments(3), OPEN_POLICY, false).await;

    let (status, message) = run_to_terminal(&harness, request("无弹幕作品"), "t-1").await;
    assert_eq!(status, "completed");
    assert!(message.contains("数据源验证失败"), "message: {message}");

    let animes = danmarr::entities::prelude::Anime::find()
        .all(&harness.store.conn)
        .await
        .unwrap();
    assert!(animes.is_empty(), "no anime row may exist without comments");
    let episodes = danmarr::entities::prelude::Episode::find()
        .all(&harness.store.conn)
        .await
        .unwrap();
    assert!(episodes.is_empty());
}

#[tokio::test]
async fn reimport_is_idempotent_and_skips_network() {
    let harness = harness(MockScraper::new(2, 5), OPEN_POLICY, false).await;

    let (status, message) = run_to_terminal(&harness, request("重复导入作品"), "t-first").await;
    assert_eq!(status, "completed");
    assert!(message.contains("成功集"), "message: {message}");
    let first_calls = harness.scraper.comment_calls.load(Ordering::SeqCst);
    assert_eq!(first_calls, 2);

    let (status, message) = run_to_terminal(&harness, request("重复导入作品"), "t-second").await;
    assert_eq!(status, "completed");
    assert!(message.contains("跳过集"), "message: {message}");
    assert!(message.contains("1-2"), "all indices listed as skipped: {message}");

    // Second run only re-fetched the validation episode.
    let second_calls = harness.scraper.comment_calls.load(Ordering::SeqCst) - first_calls;
    assert_eq!(second_calls, 1);

    let episodes = danmarr::entities::prelude::Episode::find()
        .all(&harness.store.conn)
        .await
        .unwrap();
    assert_eq!(episodes.len(), 2, "no additional episode rows on re-import");
}

#[tokio::test]
async fn tampered_policy_blocks_every_download() {
    let harness = harness(MockScraper::new(2, 5), OPEN_POLICY, true).await;

    let (status, message) = run_to_terminal(&harness, request("被阻止的作品"), "t-blocked").await;
    assert_eq!(status, "failed");
    assert!(message.contains("配置验证失败"), "message: {message}");

    assert_eq!(
        harness.scraper.comment_calls.load(Ordering::SeqCst),
        0,
        "no provider fetch may run while safe-blocked"
    );
    let animes = danmarr::entities::prelude::Anime::find()
        .all(&harness.store.conn)
        .await
        .unwrap();
    assert!(animes.is_empty());
}

#[tokio::test]
async fn rate_limit_pauses_then_auto_resumes() {
    // Two downloads per second: a 4-episode import must pause and resume
    // without operator action.
    let policy = r#"{"enabled":true,"global_limit":2,"global_period":"second"}"#;
    let harness = harness(MockScraper::new(4, 3), policy, false).await;

    let (status, message) = run_to_terminal(&harness, request("限速作品"), "t-paced").await;
    assert_eq!(status, "completed", "message: {message}");

    let source = harness
        .store
        .find_source_by_provider_media("mock", "m-1")
        .await
        .unwrap()
        .expect("source created");
    let present = harness
        .store
        .present_episode_indices_for_source(source.id)
        .await
        .unwrap();
    assert_eq!(present, vec![1, 2, 3, 4], "all episodes imported after resume");

    // The resumed run re-enters the loop at the limited episode: exactly
    // one fetch per episode, no re-enumeration or episode-1 revalidation.
    assert_eq!(
        harness.scraper.comment_calls.load(Ordering::SeqCst),
        4,
        "each episode must be fetched exactly once across pause/resume"
    );
}

#[tokio::test]
async fn duplicate_unique_keys_reject_at_submit() {
    let mut scraper = MockScraper::new(1, 3);
    scraper.fetch_delay = Some(Duration::from_millis(300));
    let harness = harness(scraper, OPEN_POLICY, false).await;

    let first = harness
        .manager
        .submit(
            import_task(&harness.engine, request("去重作品")),
            "任务一",
            Some("same-key"),
            "generic_import",
            None,
            None,
        )
        .await;
    assert!(first.is_ok());

    let second = harness
        .manager
        .submit(
            import_task(&harness.engine, request("去重作品")),
            "任务二",
            Some("same-key"),
            "generic_import",
            None,
            None,
        )
        .await;
    assert!(matches!(
        second,
        Err(SubmitError::DuplicateActive { .. } | SubmitError::DuplicateRecent { .. })
    ));
}

#[tokio::test]
async fn at_most_one_task_runs_at_a_time() {
    let mut scraper = MockScraper::new(2, 3);
    scraper.fetch_delay = Some(Duration::from_millis(150));
    let harness = harness(scraper, OPEN_POLICY, false).await;

    let mut req_b = request("单写作品");
    req_b.media_id = "m-2".to_string();

    let id_a = harness
        .manager
        .submit(
            import_task(&harness.engine, request("单写作品")),
            "任务A",
            Some("sw-a"),
            "generic_import",
            None,
            None,
        )
        .await
        .unwrap();
    let id_b = harness
        .manager
        .submit(
            import_task(&harness.engine, req_b),
            "任务B",
            Some("sw-b"),
            "generic_import",
            None,
            None,
        )
        .await
        .unwrap();

    let mut saw_running = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let a = harness.store.get_task(&id_a).await.unwrap().unwrap();
        let b = harness.store.get_task(&id_b).await.unwrap().unwrap();

        let running = [&a.status, &b.status]
            .iter()
            .filter(|s| s.as_str() == "running")
            .count();
        assert!(running <= 1, "single-writer violated: {} / {}", a.status, b.status);
        saw_running |= running == 1;

        let terminal = |s: &str| matches!(s, "completed" | "failed" | "cancelled");
        if terminal(&a.status) && terminal(&b.status) {
            break;
        }
    }
    assert!(saw_running, "neither task was ever observed running");
}
