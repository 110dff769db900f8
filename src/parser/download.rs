use super::FeedParser;
use crate::error::FetchError;
use async_zip::base::read::mem::ZipFileReader;
use bytes::{Bytes, BytesMut};
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::{Client, Response};
use std::time::Duration;

impl FeedParser {
    /// Fetches the whole feed body. Bodies above the byte ceiling are truncated, not rejected.
    pub async fn download(&self, client: &Client) -> Result<Bytes, FetchError> {
        let url = self.checked_url()?;
        let timeout = self.settings.timeout;
        let response = client
            .get(url)
            .header(USER_AGENT, &self.settings.user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let mut body = BytesMut::new();
        read_capped(response, self.settings.max_bytes, timeout, &mut body).await?;
        let body = body.freeze();
        log::info!("Downloaded {} bytes from {}", body.len(), self.url);
        if looks_like_zip(&body) {
            return unzip_first(body.to_vec(), self.settings.max_bytes).await;
        }
        Ok(body)
    }

    /// Range-limited fetch used by previews. A body cut short keeps the bytes received so
    /// far; any other failure yields an empty body.
    pub async fn download_partial(&self, client: &Client, max_bytes: u64) -> Bytes {
        let mut body = BytesMut::new();
        let res = async {
            let url = self.checked_url()?;
            let timeout = self.settings.preview_timeout;
            let response = client
                .get(url)
                .header(USER_AGENT, &self.settings.user_agent)
                .header(RANGE, format!("bytes=0-{}", max_bytes.saturating_sub(1)))
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| transport_error(err, timeout))?;
            if !response.status().is_success() {
                return Err(FetchError::Status {
                    status: response.status().as_u16(),
                    url: self.url.clone(),
                });
            }
            read_capped(response, max_bytes, timeout, &mut body).await
        };
        if let Err(err) = res.await {
            if body.is_empty() {
                log::warn!("Preview download of {} failed: {err}", self.url);
            } else {
                log::debug!(
                    "Preview download of {} cut short after {} bytes: {err}",
                    self.url,
                    body.len()
                );
            }
        }
        body.freeze()
    }

    fn checked_url(&self) -> Result<url::Url, FetchError> {
        let url = url::Url::parse(&self.url)
            .map_err(|err| FetchError::InvalidUrl(format!("{}: {err}", self.url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(FetchError::InvalidUrl(format!(
                "{}: unsupported scheme {scheme}",
                self.url
            ))),
        }
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Transport(err)
    }
}

/// Appends the response body to `body` up to `max_bytes`. On a transport error `body`
/// holds what arrived before it.
async fn read_capped(
    mut response: Response,
    max_bytes: u64,
    timeout: Duration,
    body: &mut BytesMut,
) -> Result<(), FetchError> {
    let max = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| transport_error(err, timeout))?
    {
        let room = max - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            if chunk.len() > room {
                log::warn!("Feed body truncated at {max} bytes");
            }
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(())
}

pub(crate) fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

async fn unzip_first(bytes: Vec<u8>, max_bytes: u64) -> Result<Bytes, FetchError> {
    let zip = ZipFileReader::new(bytes)
        .await
        .map_err(|err| FetchError::Archive(err.to_string()))?;
    let entry_index = zip
        .file()
        .entries()
        .iter()
        .enumerate()
        .find_map(|(idx, entry)| entry.dir().ok().and_then(|is_dir| (!is_dir).then_some(idx)))
        .ok_or_else(|| FetchError::Archive("archive has no files".to_string()))?;
    let mut reader = zip
        .reader_with_entry(entry_index)
        .await
        .map_err(|err| FetchError::Archive(err.to_string()))?;
    let mut output = Vec::new();
    reader
        .read_to_end_checked(&mut output)
        .await
        .map_err(|err| FetchError::Archive(err.to_string()))?;
    let max = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    if output.len() > max {
        log::warn!("Unpacked feed truncated at {max} bytes");
        output.truncate(max);
    }
    Ok(Bytes::from(output))
}
