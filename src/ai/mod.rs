//! Optional LLM assistance for candidate selection.
//!
//! The manager keeps one live matcher keyed by a hash of the core client
//! config (provider, key, base URL, model). Prompt-only changes hot-patch
//! the cached matcher instead of rebuilding it. Every public call is
//! bounded by a timeout and degrades to "no match" on failure — AI trouble
//! never fails an import.

pub mod prompts;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config_store::ConfigStore;
use crate::constants::timeouts;
use crate::models::media::{MetadataSearchInfo, ProviderSearchInfo};

#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub title: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub year: Option<i32>,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub match_prompt: String,
    pub metadata_prompt: String,
    pub name_conversion_prompt: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct AiMatcher {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    prompts: RwLock<PromptSet>,
}

impl AiMatcher {
    fn new(base_url: String, api_key: String, model: String, prompts: PromptSet) -> Self {
        let client = Client::builder()
            .timeout(timeouts::AI_CALL)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model,
            prompts: RwLock::new(prompts),
        }
    }

    pub fn update_prompts(&self, prompts: PromptSet) {
        *self.prompts.write().expect("prompt lock poisoned") = prompts;
    }

    fn prompts(&self) -> PromptSet {
        self.prompts.read().expect("prompt lock poisoned").clone()
    }

    /// Raw single-turn call.
    pub async fn query(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("AI endpoint returned {status}");
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("AI response had no content"))
    }

    async fn query_index(&self, prompt: &str, upper: usize) -> anyhow::Result<Option<usize>> {
        let answer = self.query(prompt).await?;
        Ok(parse_index(&answer, upper))
    }

    pub async fn select_best_match(
        &self,
        query: &MatchQuery,
        candidates: &[ProviderSearchInfo],
        favorited: &HashMap<String, bool>,
    ) -> anyhow::Result<Option<usize>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut prompt = self.prompts().match_prompt;
        prompt.push_str("\n\n查询: ");
        prompt.push_str(&format!(
            "标题='{}' 季={} 集={} 年份={} 类型={}",
            query.title,
            display_opt(query.season),
            display_opt(query.episode),
            display_opt(query.year),
            query.media_type.as_deref().unwrap_or("?"),
        ));
        prompt.push_str("\n候选:\n");
        for (i, c) in candidates.iter().enumerate() {
            let fav = favorited
                .get(&format!("{}:{}", c.provider, c.media_id))
                .copied()
                .unwrap_or(false);
            prompt.push_str(&format!(
                "{i}. [{}] '{}' 类型={} 季={} 年份={}{}\n",
                c.provider,
                c.title,
                c.media_type,
                c.season,
                display_opt(c.year),
                if fav { " (收藏)" } else { "" },
            ));
        }

        self.query_index(&prompt, candidates.len()).await
    }

    pub async fn select_metadata_result(
        &self,
        title: &str,
        year: Option<i32>,
        candidates: &[MetadataSearchInfo],
        season: Option<i32>,
        custom_prompt: Option<&str>,
    ) -> anyhow::Result<Option<usize>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut prompt = custom_prompt
            .filter(|p| !p.is_empty())
            .map_or_else(|| self.prompts().metadata_prompt, ToString::to_string);
        prompt.push_str(&format!(
            "\n\n作品: 标题='{title}' 年份={} 季={}\n结果:\n",
            display_opt(year),
            display_opt(season),
        ));
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!(
                "{i}. [{}] '{}' 年份={}\n",
                c.source,
                c.title,
                display_opt(c.year),
            ));
        }

        self.query_index(&prompt, candidates.len()).await
    }
}

fn display_opt(value: Option<i32>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

/// Accept "2", "候选 2" or similar; anything negative or out of range is a
/// deliberate no-match.
fn parse_index(answer: &str, upper: usize) -> Option<usize> {
    let token: String = answer
        .chars()
        .skip_while(|c| !c.is_ascii_digit() && *c != '-')
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    let value: i64 = token.parse().ok()?;
    if value < 0 {
        return None;
    }
    let idx = usize::try_from(value).ok()?;
    (idx < upper).then_some(idx)
}

struct CachedMatcher {
    matcher: Arc<AiMatcher>,
    core_hash: String,
    full_hash: String,
}

pub struct AiMatcherManager {
    config: ConfigStore,
    cache: Mutex<Option<CachedMatcher>>,
}

impl AiMatcherManager {
    #[must_use]
    pub fn new(config: ConfigStore) -> Self {
        Self {
            config,
            cache: Mutex::new(None),
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.config.get_bool("aiMatchEnabled", false).await
    }

    async fn load_prompts(&self) -> PromptSet {
        let get_or = |value: String, fallback: &str| {
            if value.is_empty() {
                fallback.to_string()
            } else {
                value
            }
        };

        PromptSet {
            match_prompt: get_or(
                self.config.get("aiMatchPrompt", "").await,
                prompts::DEFAULT_MATCH_PROMPT,
            ),
            metadata_prompt: get_or(
                self.config.get("aiMetadataPrompt", "").await,
                prompts::DEFAULT_METADATA_PROMPT,
            ),
            name_conversion_prompt: get_or(
                self.config.get("aiNameConversionPrompt", "").await,
                prompts::DEFAULT_NAME_CONVERSION_PROMPT,
            ),
        }
    }

    /// The live matcher, rebuilt only when the core client config changed.
    /// Prompt-only changes are hot-patched in place.
    pub async fn get_matcher(&self) -> Option<Arc<AiMatcher>> {
        if !self.is_enabled().await {
            return None;
        }

        let provider = self.config.get("aiProvider", "deepseek").await;
        let api_key = self.config.get("aiApiKey", "").await;
        let base_url = self.config.get("aiBaseUrl", "").await;
        let model = self.config.get("aiModel", "deepseek-chat").await;

        if api_key.is_empty() || base_url.is_empty() {
            warn!("AI matching enabled but api key or base url is missing");
            return None;
        }

        let prompts = self.load_prompts().await;
        let core_hash = hash_parts(&[&provider, &api_key, &base_url, &model]);
        let full_hash = hash_parts(&[
            &core_hash,
            &prompts.match_prompt,
            &prompts.metadata_prompt,
            &prompts.name_conversion_prompt,
        ]);

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_mut() {
            if cached.core_hash == core_hash {
                if cached.full_hash != full_hash {
                    info!("AI prompt config changed, hot-patching prompts");
                    cached.matcher.update_prompts(prompts);
                    cached.full_hash = full_hash;
                } else {
                    debug!("Reusing cached AI matcher");
                }
                return Some(cached.matcher.clone());
            }
            info!("AI core config changed, rebuilding matcher");
        }

        let matcher = Arc::new(AiMatcher::new(base_url, api_key, model, prompts));
        *cache = Some(CachedMatcher {
            matcher: matcher.clone(),
            core_hash,
            full_hash,
        });
        Some(matcher)
    }

    /// Tie-break a ranked candidate list. Failures and timeouts degrade to
    /// `None`.
    pub async fn select_best_match(
        &self,
        query: &MatchQuery,
        candidates: &[ProviderSearchInfo],
        favorited: &HashMap<String, bool>,
    ) -> Option<usize> {
        let matcher = self.get_matcher().await?;
        match timeout(
            timeouts::AI_CALL,
            matcher.select_best_match(query, candidates, favorited),
        )
        .await
        {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                warn!("AI match failed: {}", e);
                None
            }
            Err(_) => {
                warn!("AI match timed out");
                None
            }
        }
    }

    pub async fn select_metadata_result(
        &self,
        title: &str,
        year: Option<i32>,
        candidates: &[MetadataSearchInfo],
        season: Option<i32>,
        custom_prompt: Option<&str>,
    ) -> Option<usize> {
        let matcher = self.get_matcher().await?;
        match timeout(
            timeouts::AI_CALL,
            matcher.select_metadata_result(title, year, candidates, season, custom_prompt),
        )
        .await
        {
            Ok(Ok(index)) => index,
            Ok(Err(e)) => {
                warn!("AI metadata selection failed: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    /// Raw prompt passthrough for name conversion; `None` on any failure.
    pub async fn query(&self, prompt: &str) -> Option<String> {
        let matcher = self.get_matcher().await?;
        match timeout(timeouts::AI_CALL, matcher.query(prompt)).await {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(e)) => {
                warn!("AI query failed: {}", e);
                None
            }
            Err(_) => None,
        }
    }

    pub async fn name_conversion_prompt(&self) -> String {
        self.load_prompts().await.name_conversion_prompt
    }
}

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_parsing_accepts_decorated_answers() {
        assert_eq!(parse_index("2", 5), Some(2));
        assert_eq!(parse_index("候选 3", 5), Some(3));
        assert_eq!(parse_index("-1", 5), None);
        assert_eq!(parse_index("7", 5), None);
        assert_eq!(parse_index("no match", 5), None);
    }

    #[test]
    fn core_hash_ignores_prompt_changes() {
        let a = hash_parts(&["deepseek", "key", "url", "model"]);
        let b = hash_parts(&["deepseek", "key", "url", "model"]);
        let c = hash_parts(&["deepseek", "key2", "url", "model"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
