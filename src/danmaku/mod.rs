//! Danmaku blob storage.
//!
//! Comment payloads live out of row as JSON files; the episode row only
//! keeps the path and the count. Writes go through a temp file then rename
//! so a crash never leaves a half-written blob behind.

pub mod xml;

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::models::danmaku::Comment;

#[derive(Clone)]
pub struct DanmakuStore {
    root: PathBuf,
}

impl DanmakuStore {
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("danmaku"),
        }
    }

    fn path_for(&self, episode_id: i64) -> PathBuf {
        self.root.join(format!("{episode_id}.json"))
    }

    /// Persist the full comment list for an episode, replacing any previous
    /// blob. Returns the stored path and how many comments were written.
    pub async fn write(
        &self,
        episode_id: i64,
        comments: &[Comment],
    ) -> anyhow::Result<(String, i32)> {
        fs::create_dir_all(&self.root).await?;

        let path = self.path_for(episode_id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec(comments)?;

        fs::write(&tmp, payload).await?;
        fs::rename(&tmp, &path).await?;

        debug!(
            "Wrote {} comments for episode {} to {}",
            comments.len(),
            episode_id,
            path.display()
        );
        Ok((
            path.to_string_lossy().into_owned(),
            i32::try_from(comments.len()).unwrap_or(i32::MAX),
        ))
    }

    pub async fn read(&self, path: &str) -> anyhow::Result<Vec<Comment>> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
