use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::error::M2eError;
use crate::fs_util::gunzip;

pub trait FetchClient: Send + Sync {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, M2eError>;
}

#[derive(Clone)]
pub struct HttpFetchClient {
    client: Client,
}

impl HttpFetchClient {
    pub fn new() -> Result<Self, M2eError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("m2e/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| M2eError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| M2eError::FetchHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, M2eError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(M2eError::FetchHttp(format!("{url}: {err}")));
                }
            }
        }
    }
}

impl FetchClient for HttpFetchClient {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, M2eError> {
        let url = normalize_url(url);
        let mut response = self.send_with_retries(&url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "fetch request failed".to_string());
            return Err(M2eError::FetchStatus { status, message });
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .or_else(|| url_filename(&url))
            .ok_or_else(|| M2eError::FetchHttp(format!("cannot derive a file name from {url}")))?;

        fs::create_dir_all(dest_dir).map_err(|err| M2eError::Filesystem(err.to_string()))?;
        let destination = dest_dir.join(&file_name);
        let mut file =
            File::create(&destination).map_err(|err| M2eError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| M2eError::FetchHttp(format!("{url}: {err}")))?;
        info!(url = %url, path = %destination.display(), "downloaded");
        Ok(destination)
    }
}

// NCBI serves its FTP tree over HTTPS as well
pub fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
        return format!("https://ftp.ncbi.nlm.nih.gov/{rest}");
    }
    url.to_string()
}

pub fn disposition_filename(header: &str) -> Option<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let re = FILENAME.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid filename regex")
    });
    re.captures(header)
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str().trim().to_string())
        .and_then(sanitize_filename)
}

pub fn url_filename(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().map(str::to_string).and_then(sanitize_filename)
}

fn sanitize_filename(name: String) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or("").to_string();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

pub fn decompress(path: &Path) -> Result<PathBuf, M2eError> {
    gunzip(path)
}

pub fn get_genome(client: &dyn FetchClient, url: &str, dir: &Path) -> Result<PathBuf, M2eError> {
    let archive = client.download(url, dir)?;
    decompress(&archive)
}

pub fn get_gff(client: &dyn FetchClient, url: &str, dir: &Path) -> Result<PathBuf, M2eError> {
    let archive = client.download(url, dir)?;
    decompress(&archive)
}

pub fn get_cpgs(client: &dyn FetchClient, url: &str, dir: &Path) -> Result<PathBuf, M2eError> {
    client.download(url, dir)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
