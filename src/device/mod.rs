//! HTTP client for the microcontroller device.
//!
//! The device exposes its filesystem under `/fs`: PROPFIND lists it (with
//! MD5 sums when the `lowrmt-md5` header is set), GET/PUT move file bodies,
//! MKCOL creates directories and DELETE removes recursively. A small
//! control API reports program status and restarts the program.

pub mod listing;

use crate::error::{Result, SyncError};
use crate::snapshot::{FsNode, StatEntry};
use async_trait::async_trait;
use glob::Pattern;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Request header asking the device to include MD5 sums in the listing.
const HDR_MD5: &str = "lowrmt-md5";
/// Response header: whether the device has ever received a put.
const HDR_HAD_PUT: &str = "lowrmt-had-put";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a full device listing.
#[derive(Debug)]
pub struct RemoteListing {
    pub stats: Vec<StatEntry>,
    /// False means the device filesystem has never been synced to; the
    /// session offers an initial sync in that case.
    pub had_put: bool,
}

/// State of the program running on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    Stopped,
    Running,
    Paused,
}

/// Everything the sync session needs from a device: the filesystem
/// listing, file operations, and the small control API. The HTTP client
/// below is the one real implementation; tests substitute their own.
#[async_trait]
pub trait Device: Send + Sync {
    /// List the whole device filesystem.
    async fn list(&self, exclude: &[Pattern]) -> Result<RemoteListing>;
    /// Stat one path, for post-transfer verification. `None` when absent.
    async fn stat(&self, rel_path: &str) -> Result<Option<FsNode>>;
    async fn read_file(&self, rel_path: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, rel_path: &str, data: &[u8]) -> Result<()>;
    /// Delete a file or directory tree. Directories delete recursively; an
    /// already-absent target is success.
    async fn delete(&self, rel_path: &str) -> Result<()>;
    async fn create_dir(&self, rel_path: &str) -> Result<()>;
    /// Mark the device as having received its first put, ending the
    /// no-sync-history state.
    async fn mark_had_put(&self) -> Result<()>;
    async fn program_status(&self) -> Result<ProgramStatus>;
    async fn restart_program(&self) -> Result<()>;
}

pub struct DeviceClient {
    http: Client,
    base_url: String,
}

impl DeviceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SyncError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fs_url(&self, rel_path: &str) -> String {
        let mut url = format!("{}/fs", self.base_url);
        for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }
}

#[async_trait]
impl Device for DeviceClient {
    async fn list(&self, exclude: &[Pattern]) -> Result<RemoteListing> {
        let response = self
            .http
            .request(propfind(), self.fs_url(""))
            .header("Content-Type", "application/xml;charset=UTF-8")
            .header(HDR_MD5, "1")
            .send()
            .await?;
        let response = check_status(response, "/")?;

        let had_put = response
            .headers()
            .get(HDR_HAD_PUT)
            .and_then(|v| v.to_str().ok())
            == Some("1");
        let body = response.text().await?;
        let stats = listing::parse_listing(&body, exclude)?;
        debug!(entries = stats.len(), had_put, "device listing fetched");

        Ok(RemoteListing { stats, had_put })
    }

    async fn stat(&self, rel_path: &str) -> Result<Option<FsNode>> {
        let response = self
            .http
            .request(propfind(), self.fs_url(rel_path))
            .header("Content-Type", "application/xml;charset=UTF-8")
            .header(HDR_MD5, "1")
            .header("Depth", "0")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, rel_path)?;
        let body = response.text().await?;
        let stats = listing::parse_listing(&body, &[])?;
        Ok(stats.first().map(listing::entry_to_node))
    }

    async fn read_file(&self, rel_path: &str) -> Result<Vec<u8>> {
        let response = self.http.get(self.fs_url(rel_path)).send().await?;
        let response = check_status(response, rel_path)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn write_file(&self, rel_path: &str, data: &[u8]) -> Result<()> {
        let response = self
            .http
            .put(self.fs_url(rel_path))
            .body(data.to_vec())
            .send()
            .await?;
        check_status(response, rel_path)?;
        Ok(())
    }

    async fn delete(&self, rel_path: &str) -> Result<()> {
        let response = self
            .http
            .request(Method::DELETE, self.fs_url(rel_path))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, rel_path)?;
        Ok(())
    }

    async fn create_dir(&self, rel_path: &str) -> Result<()> {
        let response = self
            .http
            .request(mkcol(), self.fs_url(rel_path))
            .send()
            .await?;
        // the directory already existing is as good as created
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        check_status(response, rel_path)?;
        Ok(())
    }

    async fn mark_had_put(&self) -> Result<()> {
        let url = format!("{}/api/had-put", self.base_url);
        let response = self.http.post(url).send().await?;
        check_status(response, "api/had-put")?;
        Ok(())
    }

    async fn program_status(&self) -> Result<ProgramStatus> {
        let url = format!("{}/api/program/status", self.base_url);
        let response = self.http.get(url).send().await?;
        let response = check_status(response, "api/program/status")?;
        let body = response.text().await?;
        match body.trim() {
            "stopped" => Ok(ProgramStatus::Stopped),
            "paused" => Ok(ProgramStatus::Paused),
            _ => Ok(ProgramStatus::Running),
        }
    }

    async fn restart_program(&self) -> Result<()> {
        let url = format!("{}/api/program/restart", self.base_url);
        let response = self.http.post(url).send().await?;
        check_status(response, "api/program/restart")?;
        Ok(())
    }
}

fn propfind() -> Method {
    Method::from_bytes(b"PROPFIND").expect("static method name")
}

fn mkcol() -> Method {
    Method::from_bytes(b"MKCOL").expect("static method name")
}

fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::MULTI_STATUS {
        Ok(response)
    } else {
        Err(SyncError::DeviceStatus {
            status: status.as_u16(),
            path: path.to_string(),
        })
    }
}
