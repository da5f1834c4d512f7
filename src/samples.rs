//! Downloads the sample images used to try out the image tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::{MediaSightError, Result};
use crate::output::write_replace;

const SAMPLE_HOST: &str = "https://storage.googleapis.com";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// A downloadable sample and the name it is saved under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleImage {
    /// Source URL.
    pub url: &'static str,
    /// Local file name.
    pub file_name: &'static str,
}

const fn sample(url: &'static str, file_name: &'static str) -> SampleImage {
    SampleImage { url, file_name }
}

/// Public sample images from the Gemini cookbook.
pub const SAMPLE_IMAGES: [SampleImage; 11] = [
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/socks.jpg",
        "Socks.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/vegetables.jpg",
        "Vegetables.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/Japanese_Bento.png",
        "Japanese_bento.png",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/Cupcakes.jpg",
        "Cupcakes.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/origamis.jpg",
        "Origamis.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/fruits.jpg",
        "Fruits.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/cat.jpg",
        "Cat.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/pumpkins.jpg",
        "Pumpkins.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/breakfast.jpg",
        "Breakfast.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/bookshelf.jpg",
        "Bookshelf.jpg",
    ),
    sample(
        "https://storage.googleapis.com/generativeai-downloads/images/spill.jpg",
        "Spill.jpg",
    ),
];

/// One sample that could not be saved.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    /// Local file name of the sample.
    pub file_name: String,
    /// Why it failed.
    pub error: String,
}

/// Outcome of a sample download run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    /// Files written, in list order.
    pub saved: Vec<PathBuf>,
    /// Samples that failed, in list order.
    pub failed: Vec<FailedDownload>,
}

impl DownloadReport {
    /// True when every sample was saved.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches sample images over HTTP.
#[derive(Debug, Clone)]
pub struct SampleDownloader {
    client: reqwest::Client,
    host: String,
}

impl SampleDownloader {
    /// Creates a downloader with a per-file timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            host: SAMPLE_HOST.to_string(),
        })
    }

    /// Fetches from `host` instead of Google Cloud Storage, keeping each
    /// sample's path.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_string();
        self
    }

    /// Downloads every sample into `dir`, replacing existing files.
    ///
    /// A failure on one file is logged and recorded; the rest continue.
    /// Only failing to create `dir` aborts the run.
    pub async fn download_all(&self, dir: &Path) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(dir).await?;

        let mut report = DownloadReport::default();
        for sample in &SAMPLE_IMAGES {
            let path = dir.join(sample.file_name);
            let url = self.url_for(sample);
            match self.download(&url, &path).await {
                Ok(bytes) => {
                    tracing::info!(file = sample.file_name, bytes, "downloaded sample");
                    report.saved.push(path);
                }
                Err(e) => {
                    tracing::warn!(
                        file = sample.file_name,
                        %url,
                        error = %e,
                        "sample download failed"
                    );
                    report.failed.push(FailedDownload {
                        file_name: sample.file_name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    fn url_for(&self, sample: &SampleImage) -> String {
        match sample.url.strip_prefix(SAMPLE_HOST) {
            Some(path) => format!("{}{}", self.host, path),
            None => sample.url.to_string(),
        }
    }

    async fn download(&self, url: &str, path: &Path) -> Result<usize> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaSightError::Api {
                status: status.as_u16(),
                message: format!("failed to download {url}"),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(MediaSightError::EmptyFile(path.to_path_buf()));
        }
        write_replace(path, &bytes)?;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sample_list() {
        assert_eq!(SAMPLE_IMAGES.len(), 11);
        let names: HashSet<_> = SAMPLE_IMAGES.iter().map(|s| s.file_name).collect();
        assert_eq!(names.len(), 11);
        assert!(SAMPLE_IMAGES
            .iter()
            .all(|s| s.url.starts_with("https://storage.googleapis.com/generativeai-downloads/")));
        assert!(names.contains("Japanese_bento.png"));
    }

    #[test]
    fn test_host_override_keeps_path() {
        let downloader = SampleDownloader::new().unwrap().host("http://127.0.0.1:8080/");
        assert_eq!(
            downloader.url_for(&SAMPLE_IMAGES[6]),
            "http://127.0.0.1:8080/generativeai-downloads/images/cat.jpg"
        );
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // port 9 (discard) is closed on test machines, so every request fails fast
        let downloader = SampleDownloader::new().unwrap().host("http://127.0.0.1:9");
        let report = downloader.download_all(&dir.path().join("images")).await.unwrap();

        assert!(!report.is_success());
        assert!(report.saved.is_empty());
        assert_eq!(report.failed.len(), SAMPLE_IMAGES.len());
        assert_eq!(report.failed[0].file_name, "Socks.jpg");
        assert!(dir.path().join("images").is_dir());
        assert_eq!(std::fs::read_dir(dir.path().join("images")).unwrap().count(), 0);
    }
}
