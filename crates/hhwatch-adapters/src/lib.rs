//! Job-search adapter contracts + the hh.ru vacancies adapter.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use hhwatch_core::{parse_published_at, Posting, Salary};
use hhwatch_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "hhwatch-adapters";

pub const HH_SOURCE_ID: &str = "hh.ru";
pub const HH_DEFAULT_API_URL: &str = "https://api.hh.ru/vacancies";

/// Largest page the vacancies endpoint serves.
pub const HH_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed search response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// One newest-first page of remote-only postings matching `keyword`.
    async fn search(&self, keyword: &str) -> Result<Vec<Posting>, AdapterError>;
}

/// Best-effort fetch: any failure is logged and reported as "no postings".
pub async fn fetch_or_empty(adapter: &dyn SearchAdapter, keyword: &str) -> Vec<Posting> {
    match adapter.search(keyword).await {
        Ok(postings) => postings,
        Err(err) => {
            warn!(source = adapter.source_id(), keyword, error = %err, "vacancy fetch failed");
            Vec::new()
        }
    }
}

/// Query parameters sent with every vacancy search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HhQuery {
    pub text: String,
    pub schedule: String,
    pub per_page: u32,
    pub order_by: String,
}

impl HhQuery {
    pub fn remote(keyword: &str) -> Self {
        Self {
            text: keyword.to_string(),
            schedule: "remote".to_string(),
            per_page: HH_MAX_PAGE_SIZE,
            order_by: "publication_time".to_string(),
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("text", self.text.clone()),
            ("schedule", self.schedule.clone()),
            ("per_page", self.per_page.to_string()),
            ("order_by", self.order_by.clone()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HhVacanciesPage {
    #[serde(default)]
    items: Vec<HhVacancy>,
}

#[derive(Debug, Clone, Deserialize)]
struct HhVacancy {
    id: String,
    name: String,
    alternate_url: String,
    #[serde(default)]
    employer: Option<HhEmployer>,
    #[serde(default)]
    salary: Option<HhSalary>,
    published_at: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HhEmployer {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HhSalary {
    #[serde(default)]
    from: Option<f64>,
    #[serde(default)]
    to: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

impl HhVacancy {
    fn into_posting(self) -> Option<Posting> {
        let published_at = match parse_published_at(&self.published_at) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(vacancy_id = %self.id, error = %err, "skipping vacancy with bad timestamp");
                return None;
            }
        };
        Some(Posting {
            id: self.id,
            title: self.name,
            url: self.alternate_url,
            employer_name: self
                .employer
                .and_then(|e| e.name)
                .unwrap_or_default(),
            salary: self.salary.map(|s| Salary {
                from: s.from,
                to: s.to,
                currency: s.currency,
            }),
            published_at,
        })
    }
}

/// Parses a `/vacancies` response body into postings, in API order.
pub fn parse_vacancies_page(body: &[u8]) -> Result<Vec<Posting>, AdapterError> {
    let page: HhVacanciesPage = serde_json::from_slice(body)?;
    Ok(page
        .items
        .into_iter()
        .filter_map(HhVacancy::into_posting)
        .collect())
}

pub fn load_vacancies_fixture(path: impl AsRef<Path>) -> anyhow::Result<Vec<Posting>> {
    let path = path.as_ref();
    let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    parse_vacancies_page(&body).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct HhVacancyAdapter {
    http: HttpFetcher,
    api_url: String,
}

impl HhVacancyAdapter {
    pub fn new(http: HttpFetcher, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl SearchAdapter for HhVacancyAdapter {
    fn source_id(&self) -> &'static str {
        HH_SOURCE_ID
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Posting>, AdapterError> {
        let query = HhQuery::remote(keyword);
        let response = self
            .http
            .fetch_bytes(HH_SOURCE_ID, &self.api_url, &query.to_pairs())
            .await?;
        let postings = parse_vacancies_page(&response.body)?;
        debug!(keyword, count = postings.len(), url = %response.final_url, "vacancies fetched");
        Ok(postings)
    }
}
