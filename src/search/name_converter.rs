//! Title name conversion: map a non-Chinese query title onto the official
//! Chinese name by consulting metadata sources in the operator's priority
//! order, with an optional AI fallback.

use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ai::AiMatcherManager;
use crate::config_store::ConfigStore;
use crate::metadata::MetadataRegistry;
use crate::models::media::MediaType;
use crate::tasks::util::is_chinese_title;

#[derive(Debug, Deserialize)]
struct PriorityEntry {
    key: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

const DEFAULT_PRIORITY: &str = r#"[{"key":"bangumi","enabled":true},{"key":"tmdb","enabled":true},{"key":"tvdb","enabled":true},{"key":"douban","enabled":true},{"key":"imdb","enabled":true}]"#;

/// Returns `(title, converted)`. The original title comes back untouched
/// when conversion is disabled, unnecessary, or finds nothing.
pub async fn convert_to_chinese_title(
    title: &str,
    config: &ConfigStore,
    metadata: &Arc<MetadataRegistry>,
    ai: &Arc<AiMatcherManager>,
) -> (String, bool) {
    if !config.get_bool("nameConversionEnabled", false).await {
        return (title.to_string(), false);
    }
    if is_chinese_title(title) {
        return (title.to_string(), false);
    }

    info!("Non-Chinese title '{}', attempting name conversion", title);

    if let Some((source, converted)) = convert_via_metadata(title, config, metadata).await {
        info!("Name conversion via {}: '{}' -> '{}'", source, title, converted);
        return (converted, true);
    }

    if let Some(converted) = convert_via_ai(title, config, ai).await {
        info!("Name conversion via AI: '{}' -> '{}'", title, converted);
        return (converted, true);
    }

    debug!("Name conversion found no Chinese title for '{}'", title);
    (title.to_string(), false)
}

async fn convert_via_metadata(
    title: &str,
    config: &ConfigStore,
    metadata: &Arc<MetadataRegistry>,
) -> Option<(String, String)> {
    let raw = config
        .get("nameConversionSourcePriority", DEFAULT_PRIORITY)
        .await;
    let priority: Vec<PriorityEntry> = serde_json::from_str(&raw).unwrap_or_else(|_| {
        serde_json::from_str(DEFAULT_PRIORITY).expect("default priority parses")
    });

    let enabled: Vec<String> = priority
        .into_iter()
        .filter(|e| e.enabled)
        .map(|e| e.key)
        .collect();
    if enabled.is_empty() {
        return None;
    }

    // All sources are queried concurrently; results are then inspected in
    // priority order so a lower-priority hit never wins a race.
    let futures = enabled.iter().map(|name| {
        let source = metadata.get(name);
        let name = name.clone();
        let title = title.to_string();
        async move {
            let source = source?;
            let media_type = if name == "tmdb" { None } else { Some(MediaType::TvSeries) };
            match search_one_source(&*source, &title, media_type).await {
                Some(chinese) => Some((name, chinese)),
                None => None,
            }
        }
    });

    join_all(futures).await.into_iter().flatten().next()
}

async fn search_one_source(
    source: &dyn crate::metadata::MetadataSource,
    title: &str,
    media_type: Option<MediaType>,
) -> Option<String> {
    let results = source.search(title, media_type).await.ok()?;

    for result in &results {
        if is_chinese_title(&result.title) {
            return Some(result.title.clone());
        }
        if let Some(alias) = result.aliases.iter().find(|a| is_chinese_title(a)) {
            return Some(alias.clone());
        }
    }

    // Search hits may carry the original-language title only; details often
    // include the zh alias bundles.
    let first = results.first()?;
    let details = source
        .get_details(&first.id, first.media_type)
        .await
        .ok()
        .flatten()?;
    if is_chinese_title(&details.title) {
        return Some(details.title);
    }
    details
        .aliases_cn
        .iter()
        .chain(details.aliases.iter())
        .find(|a| is_chinese_title(a))
        .cloned()
}

async fn convert_via_ai(
    title: &str,
    config: &ConfigStore,
    ai: &Arc<AiMatcherManager>,
) -> Option<String> {
    if !config.get_bool("aiNameConversionEnabled", false).await {
        return None;
    }

    let prompt = format!("{}\n\n标题: {}", ai.name_conversion_prompt().await, title);
    let answer = ai.query(&prompt).await?;
    let answer = answer.trim().to_string();
    is_chinese_title(&answer).then_some(answer)
}
