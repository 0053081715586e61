//! User-state snapshot persistence + HTTP fetch utilities for hhwatch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use hhwatch_core::{UserId, UserRecord};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hhwatch-storage";

pub type UserMap = BTreeMap<UserId, UserRecord>;

/// Shared user state mirrored to a single JSON file.
///
/// Every mutation runs under one lock together with the snapshot write that
/// follows it, so concurrent handlers never interleave partial updates.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    default_check_interval_secs: u64,
    users: Mutex<UserMap>,
}

impl StateStore {
    /// Loads the snapshot at `path`. A missing or unreadable file starts empty.
    /// Records stored without an interval get `default_check_interval_secs`.
    pub async fn open(path: impl Into<PathBuf>, default_check_interval_secs: u64) -> Self {
        let path = path.into();
        let mut users = match load_snapshot(&path).await {
            Ok(Some(users)) => {
                info!(path = %path.display(), users = users.len(), "user state loaded");
                users
            }
            Ok(None) => {
                info!(path = %path.display(), "no user state file yet, starting empty");
                UserMap::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = ?err, "failed to load user state, starting empty");
                UserMap::new()
            }
        };
        for record in users.values_mut() {
            record.fill_missing_interval(default_check_interval_secs);
        }
        Self {
            path,
            default_check_interval_secs,
            users: Mutex::new(users),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_check_interval_secs(&self) -> u64 {
        self.default_check_interval_secs
    }

    pub async fn get(&self, user_id: UserId) -> Option<UserRecord> {
        self.users.lock().await.get(&user_id).cloned()
    }

    /// Returns the user's record, creating and persisting a default one first if needed.
    pub async fn get_or_create(&self, user_id: UserId) -> UserRecord {
        let mut users = self.users.lock().await;
        if let Some(record) = users.get(&user_id) {
            return record.clone();
        }
        let record = UserRecord::new(self.default_check_interval_secs);
        users.insert(user_id, record.clone());
        info!(user_id, "registered new user");
        self.persist_locked(&users).await;
        record
    }

    /// Applies `mutate` to the user's record (created on demand) and persists the
    /// whole map before releasing the lock.
    pub async fn update<F, R>(&self, user_id: UserId, mutate: F) -> R
    where
        F: FnOnce(&mut UserRecord) -> R,
    {
        let mut users = self.users.lock().await;
        let default_interval = self.default_check_interval_secs;
        let record = users
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(default_interval));
        let out = mutate(record);
        self.persist_locked(&users).await;
        out
    }

    pub async fn user_ids(&self) -> Vec<UserId> {
        self.users.lock().await.keys().copied().collect()
    }

    pub async fn snapshot(&self) -> UserMap {
        self.users.lock().await.clone()
    }

    /// Writes the current state, surfacing the error instead of logging it.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let users = self.users.lock().await;
        write_snapshot(&self.path, &users).await
    }

    async fn persist_locked(&self, users: &UserMap) {
        if let Err(err) = write_snapshot(&self.path, users).await {
            warn!(path = %self.path.display(), error = ?err, "failed to persist user state");
        }
    }
}

async fn load_snapshot(path: &Path) -> anyhow::Result<Option<UserMap>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let users = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(users))
}

/// Serializes the whole map to a sibling temp file and renames it over `path`.
async fn write_snapshot(path: &Path, users: &UserMap) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(users).context("serializing user state")?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating state directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp state file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming temp state {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Single GET attempt; non-2xx statuses become [`FetchError::HttpStatus`].
    pub async fn fetch_bytes(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
