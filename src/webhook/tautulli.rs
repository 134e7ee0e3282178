//! Tautulli (JSON) normalization. Supports multi-episode strings
//! (`"1-3,6,8"`) which fan out into one job per episode.

use serde_json::Value;

use super::Normalized;
use crate::models::media::{MediaType, MetadataIds};
use crate::models::webhook::WebhookJob;
use crate::tasks::util::parse_episode_ranges;

pub fn normalize(payload: &Value) -> Normalized {
    let event = payload.get("event").and_then(Value::as_str);
    if !matches!(event, Some("created") | None) {
        return Normalized::Ignored("event type not handled");
    }

    let ids = MetadataIds {
        tmdb_id: string_field(payload, "tmdb_id"),
        imdb_id: string_field(payload, "imdb_id"),
        tvdb_id: string_field(payload, "tvdb_id"),
        douban_id: string_field(payload, "douban_id"),
        bangumi_id: string_field(payload, "bangumi_id"),
    };
    let year = payload
        .get("year")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .and_then(|y| i32::try_from(y).ok());

    match payload.get("media_type").and_then(Value::as_str) {
        Some("episode") => {
            // show_name is preferred; title often carries the episode name.
            let title = payload
                .get("show_name")
                .and_then(Value::as_str)
                .or_else(|| payload.get("title").and_then(Value::as_str));
            let Some(title) = title else {
                return Normalized::Ignored("episode missing show name");
            };

            let season = int_field(payload, "season").unwrap_or(1);
            let Some(episode_str) = payload.get("episode").map(raw_string) else {
                return Normalized::Ignored("episode missing episode field");
            };

            let episodes = parse_episode_ranges(&episode_str);
            if episodes.is_empty() {
                return Normalized::Ignored("episode string had no valid indices");
            }

            let jobs = episodes
                .into_iter()
                .map(|episode| WebhookJob {
                    media_type: MediaType::TvSeries,
                    title: title.to_string(),
                    season,
                    episode_index: Some(episode),
                    year,
                    ids: ids.clone(),
                })
                .collect();
            Normalized::Jobs(jobs)
        }
        Some("movie") => {
            let Some(title) = payload.get("title").and_then(Value::as_str) else {
                return Normalized::Ignored("movie missing title");
            };
            Normalized::Jobs(vec![WebhookJob {
                media_type: MediaType::Movie,
                title: title.to_string(),
                season: 1,
                episode_index: Some(1),
                year,
                ids,
            }])
        }
        _ => Normalized::Ignored("media type not handled"),
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .map(raw_string)
        .filter(|s| !s.is_empty())
}

fn int_field(payload: &Value, key: &str) -> Option<i32> {
    payload
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .and_then(|v| i32::try_from(v).ok())
}

/// Tautulli sends numbers and strings interchangeably.
fn raw_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multi_episode_string_fans_out() {
        let payload = json!({
            "event": "created",
            "media_type": "episode",
            "show_name": "某科学的超电磁炮",
            "season": 1,
            "episode": "1-3,5"
        });

        let Normalized::Jobs(jobs) = normalize(&payload) else {
            panic!("expected jobs");
        };
        let indices: Vec<i32> = jobs.iter().filter_map(|j| j.episode_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 5]);
        assert!(jobs.iter().all(|j| j.title == "某科学的超电磁炮"));

        let keys: Vec<String> = jobs.iter().map(crate::models::webhook::WebhookJob::unique_key).collect();
        assert!(keys[0].ends_with("_1"));
        assert!(keys[3].ends_with("_5"));
    }

    #[test]
    fn show_name_wins_over_title() {
        let payload = json!({
            "media_type": "episode",
            "show_name": "Show",
            "title": "Episode Title",
            "season": 2,
            "episode": 4
        });

        let Normalized::Jobs(jobs) = normalize(&payload) else {
            panic!("expected jobs");
        };
        assert_eq!(jobs[0].title, "Show");
        assert_eq!(jobs[0].season, 2);
        assert_eq!(jobs[0].episode_index, Some(4));
    }
}
