//! Compiled title recognition rules.
//!
//! Operators maintain a line-based rule text (persisted in the
//! `title_recognition` table); this module compiles it into four phase
//! lists applied at fixed points of the pipeline:
//!
//! 1. `presearch` — rewrite the query title (and optionally pin the season)
//!    before any scraper is asked.
//! 2. `episode` — shift incoming provider episode indices onto the
//!    canonical numbering before comparison and upsert.
//! 3. `storage` — final title massage before the anime row is written.
//! 4. `block` — drop matching titles from result sets entirely.
//!
//! Rule grammar, one rule per line (`#` starts a comment):
//!
//! ```text
//! presearch: /<regex>/ => <replacement> [season=N]
//! episode:   /<regex>/ offset=N
//! storage:   /<regex>/ => <replacement>
//! block:     /<regex>/
//! ```
//!
//! Updating rules rebuilds the compiled set and returns warnings for
//! malformed lines and shadowed patterns; warnings never abort the update.

use regex::Regex;
use std::sync::RwLock;

#[derive(Debug)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
    season_override: Option<i32>,
}

#[derive(Debug)]
struct OffsetRule {
    pattern: Regex,
    offset: i32,
}

#[derive(Debug, Default)]
struct CompiledRules {
    pre_search: Vec<RewriteRule>,
    episode_offsets: Vec<OffsetRule>,
    storage: Vec<RewriteRule>,
    blocklist: Vec<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreSearchResult {
    pub title: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

pub struct TitleRecognizer {
    rules: RwLock<CompiledRules>,
}

impl Default for TitleRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleRecognizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(CompiledRules::default()),
        }
    }

    /// Replace the active rule set. Returns warnings; the update succeeds
    /// even when some lines are skipped.
    pub fn update_rules(&self, text: &str) -> Vec<String> {
        let (compiled, warnings) = compile(text);
        *self.rules.write().expect("recognition rules poisoned") = compiled;
        warnings
    }

    /// Phase 1: transform the parsed query before searching.
    #[must_use]
    pub fn pre_search(
        &self,
        title: &str,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> PreSearchResult {
        let rules = self.rules.read().expect("recognition rules poisoned");
        let mut out = PreSearchResult {
            title: title.to_string(),
            season,
            episode,
        };

        for rule in &rules.pre_search {
            if rule.pattern.is_match(&out.title) {
                out.title = rule
                    .pattern
                    .replace_all(&out.title, rule.replacement.as_str())
                    .trim()
                    .to_string();
                if let Some(s) = rule.season_override {
                    out.season = Some(s);
                }
            }
        }
        out
    }

    /// Phase 2: map a provider episode index to the canonical one.
    #[must_use]
    pub fn canonical_episode_index(&self, title: &str, index: i32) -> i32 {
        let rules = self.rules.read().expect("recognition rules poisoned");
        let mut out = index;
        for rule in &rules.episode_offsets {
            if rule.pattern.is_match(title) {
                out += rule.offset;
            }
        }
        out.max(1)
    }

    /// Phase 3: final massage before the title is persisted.
    #[must_use]
    pub fn storage_title(&self, title: &str) -> String {
        let rules = self.rules.read().expect("recognition rules poisoned");
        let mut out = title.trim().to_string();
        for rule in &rules.storage {
            if rule.pattern.is_match(&out) {
                out = rule
                    .pattern
                    .replace_all(&out, rule.replacement.as_str())
                    .trim()
                    .to_string();
            }
        }
        out
    }

    /// Phase 4: silently dropped from result sets.
    #[must_use]
    pub fn is_blocked(&self, title: &str) -> bool {
        let rules = self.rules.read().expect("recognition rules poisoned");
        rules.blocklist.iter().any(|p| p.is_match(title))
    }
}

fn compile(text: &str) -> (CompiledRules, Vec<String>) {
    let mut compiled = CompiledRules::default();
    let mut warnings = Vec::new();
    let mut seen: Vec<(String, String)> = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((phase, rest)) = line.split_once(':') else {
            warnings.push(format!("line {}: missing phase prefix", line_no + 1));
            continue;
        };
        let phase = phase.trim();
        let rest = rest.trim();

        let Some((pattern_src, tail)) = extract_pattern(rest) else {
            warnings.push(format!("line {}: missing /pattern/", line_no + 1));
            continue;
        };

        let pattern = match Regex::new(&pattern_src) {
            Ok(p) => p,
            Err(e) => {
                warnings.push(format!("line {}: invalid regex: {e}", line_no + 1));
                continue;
            }
        };

        let shadow_key = (phase.to_string(), pattern_src.clone());
        if seen.contains(&shadow_key) {
            warnings.push(format!(
                "line {}: rule shadows an earlier {} rule with the same pattern",
                line_no + 1,
                phase
            ));
        }
        seen.push(shadow_key);

        match phase {
            "presearch" | "storage" => {
                let Some((replacement, modifiers)) = parse_rewrite(tail) else {
                    warnings.push(format!("line {}: missing '=>' replacement", line_no + 1));
                    continue;
                };
                let rule = RewriteRule {
                    pattern,
                    replacement,
                    season_override: modifiers,
                };
                if phase == "presearch" {
                    compiled.pre_search.push(rule);
                } else {
                    compiled.storage.push(rule);
                }
            }
            "episode" => match parse_offset(tail) {
                Some(offset) => compiled.episode_offsets.push(OffsetRule { pattern, offset }),
                None => warnings.push(format!("line {}: missing offset=N", line_no + 1)),
            },
            "block" => compiled.blocklist.push(pattern),
            other => warnings.push(format!("line {}: unknown phase '{other}'", line_no + 1)),
        }
    }

    (compiled, warnings)
}

fn extract_pattern(input: &str) -> Option<(String, &str)> {
    let rest = input.strip_prefix('/')?;
    let end = rest.find('/')?;
    Some((rest[..end].to_string(), rest[end + 1..].trim()))
}

fn parse_rewrite(tail: &str) -> Option<(String, Option<i32>)> {
    let rest = tail.strip_prefix("=>")?.trim();

    if let Some((replacement, modifier)) = rest.rsplit_once("season=") {
        let season = modifier.trim().parse().ok()?;
        return Some((replacement.trim().to_string(), Some(season)));
    }
    Some((rest.to_string(), None))
}

fn parse_offset(tail: &str) -> Option<i32> {
    tail.strip_prefix("offset=")?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer(rules: &str) -> TitleRecognizer {
        let r = TitleRecognizer::new();
        let warnings = r.update_rules(rules);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
        r
    }

    #[test]
    fn presearch_rewrites_title_and_pins_season() {
        let r = recognizer("presearch: /鬼滅の刃 遊郭編/ => 鬼灭之刃 season=2");
        let out = r.pre_search("鬼滅の刃 遊郭編", None, Some(3));
        assert_eq!(out.title, "鬼灭之刃");
        assert_eq!(out.season, Some(2));
        assert_eq!(out.episode, Some(3));
    }

    #[test]
    fn episode_offset_maps_absolute_numbering() {
        let r = recognizer("episode: /巨人.*第二季/ offset=-25");
        assert_eq!(r.canonical_episode_index("进击的巨人 第二季", 26), 1);
        // Non-matching titles pass through.
        assert_eq!(r.canonical_episode_index("别的作品", 26), 26);
    }

    #[test]
    fn episode_index_never_drops_below_one() {
        let r = recognizer("episode: /x/ offset=-100");
        assert_eq!(r.canonical_episode_index("x", 3), 1);
    }

    #[test]
    fn storage_rules_strip_noise() {
        let r = recognizer(r"storage: /\s*\(仅限港澳台地区\)/ => ");
        assert_eq!(r.storage_title("某动画 (仅限港澳台地区)"), "某动画");
    }

    #[test]
    fn blocked_titles_are_detected() {
        let r = recognizer("block: /预告|PV/");
        assert!(r.is_blocked("第二季 PV"));
        assert!(!r.is_blocked("第二季 第1集"));
    }

    #[test]
    fn malformed_lines_warn_but_do_not_abort() {
        let r = TitleRecognizer::new();
        let warnings = r.update_rules(
            "presearch: /ok/ => fine\nbogus line\nepisode: /broken(/ offset=1\nblock: /valid/",
        );
        assert_eq!(warnings.len(), 2);
        assert!(r.is_blocked("valid"));
        assert_eq!(r.pre_search("ok", None, None).title, "fine");
    }

    #[test]
    fn duplicate_patterns_report_shadowing() {
        let r = TitleRecognizer::new();
        let warnings = r.update_rules("block: /same/\nblock: /same/");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("shadows"));
    }
}
