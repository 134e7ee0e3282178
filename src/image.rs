//! Poster download service. Failures only produce a warning flag in the
//! import summary; they never fail an import.

use reqwest::Client;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use crate::constants::timeouts;

#[derive(Clone)]
pub struct ImageService {
    client: Client,
    root: PathBuf,
}

impl ImageService {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .timeout(timeouts::PROVIDER_CALL)
            .build()
            .unwrap_or_default();
        Self {
            client,
            root: data_dir.into().join("images"),
        }
    }

    /// Fetch a remote poster and return the stored local path, or `None`
    /// when anything goes wrong.
    pub async fn download(&self, url: &str) -> Option<String> {
        match self.try_download(url).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Poster download failed for {}: {}", url, e);
                None
            }
        }
    }

    async fn try_download(&self, url: &str) -> anyhow::Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("image endpoint returned {}", response.status());
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            anyhow::bail!("image body was empty");
        }

        let extension = url
            .rsplit('.')
            .next()
            .filter(|ext| ext.len() <= 4 && ext.chars().all(char::is_alphanumeric))
            .unwrap_or("jpg");

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{}.{extension}", Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}
