//! Vacancy check orchestration: manual searches, background ticks, scheduling.

pub mod format;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hhwatch_adapters::{SearchAdapter, HH_DEFAULT_API_URL};
use hhwatch_core::{detect_new, merge_postings, Posting, UserId, UserRecord, DEFAULT_CHECK_INTERVAL_SECS};
use hhwatch_storage::{HttpClientConfig, StateStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hhwatch-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub telegram_token: Option<String>,
    pub default_check_interval_secs: u64,
    pub data_file: PathBuf,
    pub hh_api_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub check_tick_secs: u64,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}")),
                None => Ok(default),
            }
        };

        Ok(Self {
            telegram_token: lookup("TELEGRAM_TOKEN").filter(|t| !t.trim().is_empty()),
            default_check_interval_secs: number("CHECK_INTERVAL", DEFAULT_CHECK_INTERVAL_SECS)?,
            data_file: lookup("DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("user_data.json")),
            hh_api_url: lookup("HH_API_URL").unwrap_or_else(|| HH_DEFAULT_API_URL.to_string()),
            user_agent: lookup("HH_USER_AGENT")
                .unwrap_or_else(|| "JobSearchTelegramBot/1.0".to_string()),
            http_timeout_secs: number("HH_HTTP_TIMEOUT_SECS", 20)?,
            check_tick_secs: number("CHECK_TICK_SECS", 60)?.max(1),
        })
    }

    pub fn telegram_token(&self) -> Result<&str> {
        match self.telegram_token.as_deref() {
            Some(token) => Ok(token),
            None => bail!("TELEGRAM_TOKEN is not set"),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn check_tick(&self) -> Duration {
        Duration::from_secs(self.check_tick_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub format: MessageFormat,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: MessageFormat::Plain,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: MessageFormat::Html,
        }
    }
}

/// Outbound side of the chat platform as seen by the checker.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: UserId, message: OutgoingMessage) -> Result<()>;
}

/// Merged results of one fetch round, the ids each keyword returned, and the
/// keywords whose fetch failed.
#[derive(Debug, Clone, Default)]
pub struct CollectedPostings {
    pub postings: Vec<Posting>,
    pub ids_by_keyword: BTreeMap<String, Vec<String>>,
    pub failed_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub tick_id: Uuid,
    pub users: usize,
    pub checked: usize,
    pub skipped_disabled: usize,
    pub skipped_not_due: usize,
    pub skipped_no_keywords: usize,
    pub notified: usize,
    pub new_postings: usize,
    pub delivery_failures: usize,
}

pub struct VacancyChecker {
    store: Arc<StateStore>,
    adapter: Arc<dyn SearchAdapter>,
    notifier: Arc<dyn Notifier>,
    tick_guard: Mutex<()>,
}

impl VacancyChecker {
    pub fn new(
        store: Arc<StateStore>,
        adapter: Arc<dyn SearchAdapter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            adapter,
            notifier,
            tick_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Fetches every keyword in order and merges the results.
    pub async fn collect(&self, keywords: &[String]) -> CollectedPostings {
        let mut per_keyword = Vec::with_capacity(keywords.len());
        let mut ids_by_keyword = BTreeMap::new();
        let mut failed_keywords = Vec::new();
        for keyword in keywords {
            match self.adapter.search(keyword).await {
                Ok(postings) => {
                    ids_by_keyword.insert(
                        keyword.clone(),
                        postings.iter().map(|p| p.id.clone()).collect(),
                    );
                    per_keyword.push(postings);
                }
                Err(err) => {
                    warn!(source = self.adapter.source_id(), keyword = %keyword, error = %err, "vacancy fetch failed");
                    failed_keywords.push(keyword.clone());
                }
            }
        }
        CollectedPostings {
            postings: merge_postings(per_keyword),
            ids_by_keyword,
            failed_keywords,
        }
    }

    /// Manual `/search`: shows every current posting and resets the seen set,
    /// so nothing shown here is announced again by the background check.
    pub async fn search_and_report(&self, user_id: UserId, now: DateTime<Utc>) -> Result<usize> {
        let record = self.store.get_or_create(user_id).await;
        if record.keywords.is_empty() {
            self.notify(user_id, OutgoingMessage::plain(format::NO_KEYWORDS_FOR_SEARCH))
                .await?;
            return Ok(0);
        }

        self.notify(user_id, OutgoingMessage::plain(format::SEARCH_STARTED))
            .await?;

        let CollectedPostings {
            postings,
            ids_by_keyword,
            failed_keywords,
        } = self.collect(&record.keywords).await;
        self.store
            .update(user_id, |r| r.record_check(ids_by_keyword, &failed_keywords, now))
            .await;

        info!(user_id, found = postings.len(), "manual search finished");
        if postings.is_empty() {
            self.notify(user_id, OutgoingMessage::plain(format::NOTHING_FOUND))
                .await?;
            return Ok(0);
        }

        self.notify(user_id, OutgoingMessage::plain(format::found_header(postings.len())))
            .await?;
        self.send_batches(user_id, &postings).await?;
        self.notify(user_id, OutgoingMessage::plain(format::SEARCH_FINISHED))
            .await?;
        Ok(postings.len())
    }

    /// Background check for one user; the gate is the caller's concern.
    /// Returns the postings that were new for this user.
    pub async fn check_user(&self, user_id: UserId, record: &UserRecord, now: DateTime<Utc>) -> Vec<Posting> {
        let CollectedPostings {
            postings,
            ids_by_keyword,
            failed_keywords,
        } = self.collect(&record.keywords).await;
        let new_postings = detect_new(&postings, &record.seen_ids());
        self.store
            .update(user_id, |r| r.record_check(ids_by_keyword, &failed_keywords, now))
            .await;
        debug!(
            user_id,
            total = postings.len(),
            new = new_postings.len(),
            failed_keywords = failed_keywords.len(),
            "user check finished"
        );
        new_postings
    }

    /// One firing of the background job. Returns `None` when a previous tick is
    /// still running.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Option<TickSummary> {
        let Ok(_running) = self.tick_guard.try_lock() else {
            warn!("previous check tick still running, skipping");
            return None;
        };
        let tick_id = Uuid::new_v4();
        let summary = self
            .run_tick_locked(tick_id, now)
            .instrument(info_span!("check_tick", %tick_id))
            .await;
        Some(summary)
    }

    async fn run_tick_locked(&self, tick_id: Uuid, now: DateTime<Utc>) -> TickSummary {
        let users = self.store.snapshot().await;
        let mut summary = TickSummary {
            tick_id,
            users: users.len(),
            ..Default::default()
        };

        for (user_id, record) in users {
            if !record.notifications_enabled {
                summary.skipped_disabled += 1;
                continue;
            }
            if !record.is_due(now) {
                summary.skipped_not_due += 1;
                continue;
            }
            if record.keywords.is_empty() {
                summary.skipped_no_keywords += 1;
                continue;
            }

            info!(user_id, "checking for new vacancies");
            summary.checked += 1;
            let new_postings = self.check_user(user_id, &record, now).await;
            if new_postings.is_empty() {
                continue;
            }

            summary.new_postings += new_postings.len();
            match self.deliver_new(user_id, &new_postings).await {
                Ok(()) => summary.notified += 1,
                Err(err) => {
                    summary.delivery_failures += 1;
                    warn!(user_id, error = ?err, "failed to deliver vacancy notification");
                }
            }
        }

        if summary.checked > 0 {
            info!(
                users = summary.users,
                checked = summary.checked,
                notified = summary.notified,
                new_postings = summary.new_postings,
                delivery_failures = summary.delivery_failures,
                "check tick finished"
            );
        }
        summary
    }

    async fn deliver_new(&self, user_id: UserId, new_postings: &[Posting]) -> Result<()> {
        self.notify(
            user_id,
            OutgoingMessage::plain(format::new_postings_header(new_postings.len())),
        )
        .await?;
        self.send_batches(user_id, new_postings).await
    }

    async fn send_batches(&self, user_id: UserId, postings: &[Posting]) -> Result<()> {
        for batch in format::render_batches(postings) {
            self.notify(user_id, OutgoingMessage::html(batch)).await?;
        }
        Ok(())
    }

    async fn notify(&self, user_id: UserId, message: OutgoingMessage) -> Result<()> {
        self.notifier
            .send(user_id, message)
            .await
            .with_context(|| format!("sending message to user {user_id}"))
    }
}

/// Repeating job that runs [`VacancyChecker::run_tick`] every `tick_every`.
pub async fn build_scheduler(checker: Arc<VacancyChecker>, tick_every: Duration) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_repeated_async(tick_every, move |_uuid, _l| {
        let checker = checker.clone();
        Box::pin(async move {
            checker.run_tick(Utc::now()).await;
        })
    })
    .with_context(|| format!("creating check job every {tick_every:?}"))?;
    sched.add(job).await.context("adding check job")?;
    Ok(sched)
}
