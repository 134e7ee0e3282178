use serde::{Deserialize, Serialize};

/// A single timed comment. `style` carries the provider's raw parameter
/// blob (mode, color, user hash) untouched; only `timestamp` and `text`
/// are interpreted by this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub timestamp: f64,
    pub style: String,
    pub text: String,
}

impl Comment {
    #[must_use]
    pub fn new(timestamp: f64, style: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            style: style.into(),
            text: text.into(),
        }
    }
}
