//! Small helpers shared by task bodies.

use tracing::warn;

/// Parse an episode range string (`"1"`, `"1-3"`, `"1,3,5,11-13"`) into a
/// sorted, deduplicated list. Malformed atoms are skipped with a warning
/// rather than failing the whole string.
#[must_use]
pub fn parse_episode_ranges(episode_str: &str) -> Vec<i32> {
    let cleaned: String = episode_str.chars().filter(|c| !c.is_whitespace()).collect();

    let mut episodes: Vec<i32> = Vec::new();
    for part in cleaned.split(',').filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            match (start.parse::<i32>(), end.parse::<i32>()) {
                (Ok(s), Ok(e)) if s <= e => episodes.extend(s..=e),
                _ => warn!("Unparseable episode range atom '{}'", part),
            }
        } else {
            match part.parse::<i32>() {
                Ok(n) => episodes.push(n),
                Err(_) => warn!("Unparseable episode number '{}'", part),
            }
        }
    }

    episodes.retain(|&n| n > 0);
    episodes.sort_unstable();
    episodes.dedup();
    episodes
}

/// Collapse a list of indices into the compact display form:
/// `[1, 2, 3, 5, 8, 9, 10]` -> `"1-3, 5, 8-10"`.
#[must_use]
pub fn format_episode_ranges(indices: &[i32]) -> String {
    let mut sorted: Vec<i32> = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    if sorted.is_empty() {
        return "无".to_string();
    }

    let mut ranges: Vec<String> = Vec::new();
    let mut start = sorted[0];
    let mut end = sorted[0];

    for &n in &sorted[1..] {
        if n == end + 1 {
            end = n;
        } else {
            ranges.push(render_range(start, end));
            start = n;
            end = n;
        }
    }
    ranges.push(render_range(start, end));
    ranges.join(", ")
}

fn render_range(start: i32, end: i32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// A title is Chinese iff it contains at least one CJK ideograph and no
/// Hiragana or Katakana.
#[must_use]
pub fn is_chinese_title(title: &str) -> bool {
    if title.is_empty() {
        return false;
    }

    let mut has_han = false;
    for c in title.chars() {
        let cp = c as u32;
        // Hiragana U+3040-309F, Katakana U+30A0-30FF
        if (0x3040..=0x30FF).contains(&cp) {
            return false;
        }
        // CJK Unified Ideographs, Extension A, Compatibility Ideographs
        if (0x4E00..=0x9FFF).contains(&cp)
            || (0x3400..=0x4DBF).contains(&cp)
            || (0xF900..=0xFAFF).contains(&cp)
        {
            has_han = true;
        }
    }
    has_han
}

/// Keyword-based movie detection applied to candidates the provider tagged
/// as a series.
#[must_use]
pub fn is_movie_by_title(title: &str) -> bool {
    if title.is_empty() {
        return false;
    }
    let lower = title.to_lowercase();
    ["剧场版", "劇場版", "movie", "映画"]
        .iter()
        .any(|kw| lower.contains(kw))
}

/// Reduce an error to a single line of at most 100 characters for the task
/// history message column. SQL text, stacks and long bodies never reach the
/// operator.
#[must_use]
pub fn short_error_message(error: &anyhow::Error) -> String {
    let text = error.to_string();
    let first_line = text.lines().next().unwrap_or("").trim();

    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() > 100 {
        let truncated: String = chars[..97].iter().collect();
        format!("{truncated}...")
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_episode() {
        assert_eq!(parse_episode_ranges("6"), vec![6]);
    }

    #[test]
    fn parses_mixed_ranges_sorted_and_deduped() {
        assert_eq!(
            parse_episode_ranges("11-13, 1,3,5, 3"),
            vec![1, 3, 5, 11, 12, 13]
        );
    }

    #[test]
    fn skips_malformed_atoms() {
        assert_eq!(parse_episode_ranges("1,abc,3-x,5"), vec![1, 5]);
    }

    #[test]
    fn range_string_round_trip() {
        let input = vec![10, 1, 2, 3, 5, 8, 9];
        let rendered = format_episode_ranges(&input);
        assert_eq!(rendered, "1-3, 5, 8-10");
        assert_eq!(parse_episode_ranges(&rendered), vec![1, 2, 3, 5, 8, 9, 10]);
    }

    #[test]
    fn empty_indices_render_placeholder() {
        assert_eq!(format_episode_ranges(&[]), "无");
    }

    #[test]
    fn chinese_title_detection() {
        assert!(is_chinese_title("鬼灭之刃"));
        assert!(is_chinese_title("进击的巨人 最终季"));
        // Kana disqualifies even with Han characters present.
        assert!(!is_chinese_title("鬼滅の刃"));
        assert!(!is_chinese_title("ソードアート・オンライン"));
        assert!(!is_chinese_title("Attack on Titan"));
        assert!(!is_chinese_title(""));
    }

    #[test]
    fn movie_keyword_detection() {
        assert!(is_movie_by_title("鬼灭之刃 剧场版 无限列车篇"));
        assert!(is_movie_by_title("Kimi no Na wa Movie"));
        assert!(!is_movie_by_title("鬼灭之刃"));
    }

    #[test]
    fn short_error_keeps_first_line_only() {
        let err = anyhow::anyhow!("top line\nSELECT * FROM episode WHERE ...\nmore");
        assert_eq!(short_error_message(&err), "top line");
    }

    #[test]
    fn short_error_truncates_long_lines() {
        let err = anyhow::anyhow!("{}", "x".repeat(200));
        let msg = short_error_message(&err);
        assert_eq!(msg.chars().count(), 100);
        assert!(msg.ends_with("..."));
    }
}
