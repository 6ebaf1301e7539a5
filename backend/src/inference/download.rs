use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

const UNKNOWN_LENGTH_LOG_STEP: u64 = 10 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Model artifact not found at {0} and no MODEL_URL is configured")]
    NoSource(PathBuf),
    #[error("Download request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Download returned HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("Failed to write model artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

/// Makes sure the artifact exists at `path`, fetching it from `url` if it does not.
/// Calling this again once the file is in place does nothing.
pub async fn ensure_model_artifact(
    path: &Path,
    url: Option<&str>,
) -> Result<DownloadOutcome, DownloadError> {
    ensure_with_read_timeout(path, url, READ_TIMEOUT).await
}

/// A server that goes quiet for longer than `read_timeout` fails the download.
async fn ensure_with_read_timeout(
    path: &Path,
    url: Option<&str>,
    read_timeout: Duration,
) -> Result<DownloadOutcome, DownloadError> {
    if tokio::fs::try_exists(path).await? {
        log::info!("Model artifact already present at {}", path.display());
        return Ok(DownloadOutcome::AlreadyPresent);
    }

    let url = url.ok_or_else(|| DownloadError::NoSource(path.to_path_buf()))?;
    let bytes = download(url, path, read_timeout).await?;
    Ok(DownloadOutcome::Downloaded { bytes })
}

async fn download(url: &str, path: &Path, read_timeout: Duration) -> Result<u64, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    log::info!("Downloading model from {} to {}", url, path.display());

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()?;
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::BadStatus(response.status()));
    }

    let total = response.content_length();
    let partial = partial_path(path);
    let mut file = tokio::fs::File::create(&partial).await?;

    let result = async {
        let mut written: u64 = 0;
        let mut next_report = report_step(total);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if written >= next_report {
                match total {
                    Some(total) if total > 0 => log::info!(
                        "Model download progress: {}% ({} / {} bytes)",
                        written * 100 / total,
                        written,
                        total
                    ),
                    _ => log::info!("Model download progress: {} bytes", written),
                }
                next_report = written + report_step(total);
            }
        }
        file.flush().await?;
        Ok::<u64, DownloadError>(written)
    }
    .await;
    drop(file);

    match result {
        Ok(written) => {
            tokio::fs::rename(&partial, path).await?;
            log::info!("Model downloaded: {} bytes written to {}", written, path.display());
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                log::warn!(
                    "Could not remove partial download {}: {}",
                    partial.display(),
                    cleanup
                );
            }
            Err(e)
        }
    }
}

fn report_step(total: Option<u64>) -> u64 {
    match total {
        Some(total) if total >= 10 => total / 10,
        Some(_) => 1,
        None => UNKNOWN_LENGTH_LOG_STEP,
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
