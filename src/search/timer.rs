//! Per-stage timing for search flows. Reports land in the log as one
//! structured line per step plus a total, so slow providers stand out.

use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct TimingStep {
    pub name: &'static str,
    pub duration_ms: u128,
    pub success: bool,
    pub details: Option<String>,
}

pub struct SearchTimer {
    search_type: &'static str,
    keyword: String,
    started: Instant,
    step_started: Option<(Instant, &'static str)>,
    steps: Vec<TimingStep>,
}

impl SearchTimer {
    #[must_use]
    pub fn start(search_type: &'static str, keyword: &str) -> Self {
        Self {
            search_type,
            keyword: keyword.to_string(),
            started: Instant::now(),
            step_started: None,
            steps: Vec::new(),
        }
    }

    pub fn step_start(&mut self, name: &'static str) {
        self.step_end(true, None);
        self.step_started = Some((Instant::now(), name));
    }

    pub fn step_end(&mut self, success: bool, details: Option<String>) {
        if let Some((start, name)) = self.step_started.take() {
            self.steps.push(TimingStep {
                name,
                duration_ms: start.elapsed().as_millis(),
                success,
                details,
            });
        }
    }

    /// Close any open step and log the report.
    pub fn finish(mut self) -> Vec<TimingStep> {
        self.step_end(true, None);
        let total_ms = self.started.elapsed().as_millis();

        for step in &self.steps {
            info!(
                event = "search_step",
                search_type = self.search_type,
                keyword = %self.keyword,
                step = step.name,
                duration_ms = step.duration_ms as u64,
                success = step.success,
                details = step.details.as_deref().unwrap_or(""),
                "search step finished"
            );
        }
        info!(
            event = "search_finished",
            search_type = self.search_type,
            keyword = %self.keyword,
            duration_ms = total_ms as u64,
            steps = self.steps.len(),
            "search finished"
        );
        self.steps
    }
}

/// Search flow labels used in timing reports.
pub mod search_types {
    pub const HOME: &str = "home-search";
    pub const WEBHOOK: &str = "webhook-import";
    pub const AUTO_IMPORT: &str = "auto-import";
    pub const FALLBACK_MATCH: &str = "fallback-match";
    pub const FALLBACK_SEARCH: &str = "fallback-search";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_recorded_in_order() {
        let mut timer = SearchTimer::start("home-search", "test");
        timer.step_start("parse");
        timer.step_start("search");
        timer.step_end(false, Some("boom".into()));

        let steps = timer.finish();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "parse");
        assert!(steps[0].success);
        assert_eq!(steps[1].name, "search");
        assert!(!steps[1].success);
    }
}
