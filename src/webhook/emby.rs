//! Emby payload normalization. Fires on `library.new`, `item.markplayed`
//! and `item.rate` for Episode/Movie/Series items. A Series-level event has
//! no season info; it turns into a season probe handled by the dispatcher.

use serde_json::Value;

use super::{Normalized, provider_ids_from_map};
use crate::models::media::MediaType;
use crate::models::webhook::WebhookJob;

pub fn normalize(payload: &Value) -> Normalized {
    let event = payload.get("Event").and_then(Value::as_str).unwrap_or("");
    if !matches!(event, "library.new" | "item.markplayed" | "item.rate") {
        return Normalized::Ignored("event type not handled");
    }

    let Some(item) = payload.get("Item") else {
        return Normalized::Ignored("payload missing Item");
    };

    let item_type = item.get("Type").and_then(Value::as_str).unwrap_or("");
    let ids = provider_ids_from_map(item.get("ProviderIds"));
    let year = item
        .get("ProductionYear")
        .and_then(Value::as_i64)
        .and_then(|y| i32::try_from(y).ok());

    match item_type {
        "Episode" => {
            let Some(title) = item.get("SeriesName").and_then(Value::as_str) else {
                return Normalized::Ignored("episode missing series name");
            };
            let (Some(season), Some(episode)) = (
                item.get("ParentIndexNumber")
                    .and_then(Value::as_i64)
                    .and_then(|v| i32::try_from(v).ok()),
                item.get("IndexNumber")
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
        "Movie" => {
            let Some(title) = item.get("Name").and_then(Value::as_str) else {
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
        "Series" => {
            let title = item
                .get("Name")
                .or_else(|| item.get("OriginalTitle"))
                .or_else(|| item.get("SortName"))
                .and_then(Value::as_str);
            let Some(title) = title else {
                return Normalized::Ignored("series missing title");
            };
            Normalized::SeriesProbe {
                title: title.to_string(),
                year,
                ids,
            }
        }
        _ => Normalized::Ignored("item type not handled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn episode_event_normalizes() {
        let payload = json!({
            "Event": "library.new",
            "Item": {
                "Type": "Episode",
                "SeriesName": "鬼灭之刃",
                "ParentIndexNumber": 2,
                "IndexNumber": 3,
                "ProductionYear": 2021,
                "ProviderIds": {"Tmdb": "85937", "IMDB": "tt9335498"}
            }
        });

        let Normalized::Jobs(jobs) = normalize(&payload) else {
            panic!("expected jobs");
        };
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "鬼灭之刃");
        assert_eq!(jobs[0].season, 2);
        assert_eq!(jobs[0].episode_index, Some(3));
        assert_eq!(jobs[0].ids.tmdb_id.as_deref(), Some("85937"));
        assert_eq!(jobs[0].ids.imdb_id.as_deref(), Some("tt9335498"));
    }

    #[test]
    fn series_event_becomes_probe() {
        let payload = json!({
            "Event": "item.rate",
            "Item": {"Type": "Series", "Name": "进击的巨人"}
        });
        assert!(matches!(
            normalize(&payload),
            Normalized::SeriesProbe { title, .. } if title == "进击的巨人"
        ));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let payload = json!({"Event": "playback.start", "Item": {"Type": "Episode"}});
        assert!(matches!(normalize(&payload), Normalized::Ignored(_)));
    }
}
