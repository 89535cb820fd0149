//! Frame sources
//!
//! - `HttpSnapshotSource`: camera snapshot URL (JPEG over HTTP)
//! - `DirectoryFrameSource`: cycles through image files (simulation mode)

use crate::error::{Error, Result};
use crate::lane_pipeline::FrameSource;
use crate::models::Frame;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Pulls one JPEG per call from a camera snapshot URL
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::SensorUnavailable(format!("snapshot request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::SensorUnavailable(format!(
                "snapshot HTTP error: {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::SensorUnavailable(format!("snapshot body failed: {}", e)))?;
        if bytes.is_empty() {
            return Err(Error::SensorUnavailable("empty snapshot".into()));
        }

        Ok(Frame::new(bytes.to_vec()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Replays image files from a directory in name order, looping
pub struct DirectoryFrameSource {
    dir: PathBuf,
    next: usize,
}

impl DirectoryFrameSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: 0,
        }
    }

    async fn list_images(&self) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            Error::SensorUnavailable(format!("{}: {}", self.dir.display(), e))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        let files = self.list_images().await?;
        if files.is_empty() {
            return Err(Error::SensorUnavailable(format!(
                "no images in {}",
                self.dir.display()
            )));
        }

        let path = &files[self.next % files.len()];
        self.next = self.next.wrapping_add(1);
        let data = fs::read(path)
            .await
            .map_err(|e| Error::SensorUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Frame::new(data))
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.dir.display())
    }
}

/// Build a source from a camera setting (`http(s)://...` or `file://<dir>`)
pub fn from_setting(setting: &str, timeout: Duration) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = setting.strip_prefix("file://") {
        return Ok(Box::new(DirectoryFrameSource::new(dir)));
    }
    if setting.starts_with("http://") || setting.starts_with("https://") {
        return Ok(Box::new(HttpSnapshotSource::new(setting.to_string(), timeout)?));
    }
    Err(Error::Config(format!("unsupported camera source: {}", setting)))
}
