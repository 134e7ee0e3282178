//! Operator keyword parsing (`"鬼灭之刃 S02E03"` style).

use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyword {
    pub title: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<title>.+?)\s+S(?P<season>\d{1,2})(?:\s*E(?P<episode>\d{1,4}))?\s*$")
        .expect("keyword regex")
});

static CN_SEASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>.+?)\s*第\s*(?P<season>\d{1,2})\s*季\s*$").expect("cn season regex")
});

/// Split a raw keyword into title plus optional season/episode. Keywords
/// without markers come back with both unset.
#[must_use]
pub fn parse_search_keyword(keyword: &str) -> ParsedKeyword {
    let trimmed = keyword.trim();

    if let Some(caps) = SEASON_EPISODE.captures(trimmed) {
        return ParsedKeyword {
            title: caps["title"].trim().to_string(),
            season: caps["season"].parse().ok(),
            episode: caps.name("episode").and_then(|m| m.as_str().parse().ok()),
        };
    }

    if let Some(caps) = CN_SEASON.captures(trimmed) {
        return ParsedKeyword {
            title: caps["title"].trim().to_string(),
            season: caps["season"].parse().ok(),
            episode: None,
        };
    }

    ParsedKeyword {
        title: trimmed.to_string(),
        season: None,
        episode: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_season_and_episode() {
        let parsed = parse_search_keyword("鬼灭之刃 S02E03");
        assert_eq!(parsed.title, "鬼灭之刃");
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episode, Some(3));
    }

    #[test]
    fn parses_season_only() {
        let parsed = parse_search_keyword("Frieren S1");
        assert_eq!(parsed.title, "Frieren");
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, None);
    }

    #[test]
    fn parses_chinese_season_marker() {
        let parsed = parse_search_keyword("进击的巨人 第3季");
        assert_eq!(parsed.title, "进击的巨人");
        assert_eq!(parsed.season, Some(3));
    }

    #[test]
    fn bare_title_passes_through() {
        let parsed = parse_search_keyword("  Steins;Gate  ");
        assert_eq!(parsed.title, "Steins;Gate");
        assert_eq!(parsed.season, None);
        assert_eq!(parsed.episode, None);
    }
}
