//! Jellyfin payload normalization (`ItemAdded` notifications). Provider ids
//! arrive as flat `Provider_*` fields and the year hides inside
//! `PremiereDate`.

use serde_json::Value;

use super::Normalized;
use crate::models::media::{MediaType, MetadataIds};
use crate::models::webhook::WebhookJob;

pub fn normalize(payload: &Value) -> Normalized {
    let event = payload
        .get("NotificationType")
        .and_then(Value::as_str)
        .unwrap_or("");
    if event != "ItemAdded" {
        return Normalized::Ignored("notification type not handled");
    }

    let ids = MetadataIds {
        tmdb_id: string_field(payload, "Provider_tmdb"),
        imdb_id: string_field(payload, "Provider_imdb"),
        tvdb_id: string_field(payload, "Provider_tvdb"),
        douban_id: string_field(payload, "Provider_doubanid"),
        bangumi_id: string_field(payload, "Provider_bangumi"),
    };

    let year = payload
        .get("PremiereDate")
        .and_then(Value::as_str)
        .and_then(|date| date.split('-').next())
        .and_then(|y| y.parse().ok());

    match payload.get("ItemType").and_then(Value::as_str) {
        Some("Episode") => {
            let Some(title) = payload.get("SeriesName").and_then(Value::as_str) else {
                return Normalized::Ignored("episode missing series name");
            };
            let (Some(season), Some(episode)) = (
                payload
                    .get("SeasonNumber")
                    .and_then(Value::as_i64)
                    .and_then(|v| i32::try_from(v).ok()),
                payload
                    .get("EpisodeNumber")
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
        Some("Movie") => {
            let Some(title) = payload.get("Name").and_then(Value::as_str) else {
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
        _ => Normalized::Ignored("item type not handled"),
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_added_episode_normalizes_with_premiere_year() {
        let payload = json!({
            "NotificationType": "ItemAdded",
            "ItemType": "Episode",
            "SeriesName": "葬送的芙莉莲",
            "SeasonNumber": 1,
            "EpisodeNumber": 5,
            "PremiereDate": "2023-09-29T00:00:00Z",
            "Provider_tmdb": "209867"
        });

        let Normalized::Jobs(jobs) = normalize(&payload) else {
            panic!("expected jobs");
        };
        assert_eq!(jobs[0].year, Some(2023));
        assert_eq!(jobs[0].episode_index, Some(5));
        assert_eq!(jobs[0].ids.tmdb_id.as_deref(), Some("209867"));
    }

    #[test]
    fn other_notifications_are_ignored() {
        let payload = json!({"NotificationType": "PlaybackStart"});
        assert!(matches!(normalize(&payload), Normalized::Ignored(_)));
    }
}
