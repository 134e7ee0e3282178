//! Plex (native webhook) normalization. Plex posts multipart form data; the
//! API layer extracts the `payload` JSON field before calling in here.

use serde_json::Value;

use super::{Normalized, provider_ids_from_guids};
use crate::models::media::MediaType;
use crate::models::webhook::WebhookJob;

pub fn normalize(payload: &Value) -> Normalized {
    let event = payload.get("event").and_then(Value::as_str).unwrap_or("");
    if event != "library.new" {
        return Normalized::Ignored("event type not handled");
    }

    let Some(metadata) = payload.get("Metadata") else {
        return Normalized::Ignored("payload missing Metadata");
    };

    let ids = provider_ids_from_guids(metadata.get("Guid"));
    let year = metadata
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|y| i32::try_from(y).ok());

    match metadata.get("type").and_then(Value::as_str) {
        Some("episode") => {
            let Some(title) = metadata.get("grandparentTitle").and_then(Value::as_str) else {
                return Normalized::Ignored("episode missing grandparent title");
            };
            let (Some(season), Some(episode)) = (
                metadata
                    .get("parentIndex")
                    .and_then(Value::as_i64)
                    .and_then(|v| i32::try_from(v).ok()),
                metadata
                    .get("index")
                    .and_then(Value::as_i64)
                    .and_then(|v| i32::try_from(v).ok()),
            ) else {
                return Normalized::Ignored("episode missing season or index");
            };

            Normalized::Jobs(vec![WebhookJob {
                media_type: MediaType::TvSeries,
                title: title.to_string(),
                season,
                episode_index: Some(episode),
                year,
                ids,
            }])
        }
        Some("movie") => {
            let Some(title) = metadata.get("title").and_then(Value::as_str) else {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn library_new_episode_normalizes() {
        let payload = json!({
            "event": "library.new",
            "Metadata": {
                "type": "episode",
                "grandparentTitle": "咒术回战",
                "parentIndex": 2,
                "index": 7,
                "year": 2023,
                "Guid": [
                    {"id": "tmdb://95479"},
                    {"id": "imdb://tt12343534"}
                ]
            }
        });

        let Normalized::Jobs(jobs) = normalize(&payload) else {
            panic!("expected jobs");
        };
        assert_eq!(jobs[0].title, "咒术回战");
        assert_eq!(jobs[0].season, 2);
        assert_eq!(jobs[0].ids.tmdb_id.as_deref(), Some("95479"));
        assert_eq!(jobs[0].ids.imdb_id.as_deref(), Some("tt12343534"));
    }

    #[test]
    fn other_events_are_ignored() {
        let payload = json!({"event": "media.play"});
        assert!(matches!(normalize(&payload), Normalized::Ignored(_)));
    }
}
