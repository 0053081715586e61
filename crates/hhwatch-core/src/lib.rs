//! Core domain model and vacancy detection rules for hhwatch.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "hhwatch-core";

/// Platform-assigned user identifier (Telegram user id).
pub type UserId = u64;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;

/// Check intervals offered by the settings menu, in hours.
pub const INTERVAL_PRESETS_HOURS: [u32; 5] = [1, 3, 6, 12, 24];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unsupported check interval: {0}h")]
    UnsupportedInterval(u32),
    #[error("invalid publication timestamp {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Salary {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub currency: Option<String>,
}

/// A single vacancy as returned by the search API. Only `id` outlives a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: String,
    pub title: String,
    pub url: String,
    pub employer_name: String,
    pub salary: Option<Salary>,
    pub published_at: DateTime<FixedOffset>,
}

/// Parses ISO-8601 timestamps with a `Z`, `+03:00` or compact `+0300` suffix.
pub fn parse_published_at(raw: &str) -> Result<DateTime<FixedOffset>, CoreError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map_err(|_| CoreError::InvalidTimestamp(raw.to_string()))
}

/// Concatenates per-keyword results, keeps the first posting for every id and
/// orders the survivors newest first. Equal timestamps keep their first-seen order.
pub fn merge_postings<I>(per_keyword: I) -> Vec<Posting>
where
    I: IntoIterator<Item = Vec<Posting>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for batch in per_keyword {
        for posting in batch {
            if seen.insert(posting.id.clone()) {
                merged.push(posting);
            }
        }
    }
    merged.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    merged
}

/// Postings whose id is not in `previous_ids`, in input order.
pub fn detect_new(deduped: &[Posting], previous_ids: &HashSet<String>) -> Vec<Posting> {
    deduped
        .iter()
        .filter(|posting| !previous_ids.contains(&posting.id))
        .cloned()
        .collect()
}

pub fn is_due(last_check: Option<DateTime<Utc>>, interval_secs: u64, now: DateTime<Utc>) -> bool {
    let Some(last_check) = last_check else {
        return true;
    };
    let next_check = i64::try_from(interval_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|interval| last_check.checked_add_signed(interval));
    match next_check {
        Some(next_check) => now >= next_check,
        None => false,
    }
}

fn default_true() -> bool {
    true
}


/// Accepts RFC 3339 as well as offset-less timestamps (read as local time),
/// which older state files contain.
fn deserialize_last_check<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(serde::de::Error::custom)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time {raw}")))
}

/// Per-user persisted state. Field names on disk match the legacy `user_data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_last_check")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default, rename = "last_vacancies")]
    pub last_seen_ids: Vec<String>,
    #[serde(default = "default_true", rename = "notification_enabled")]
    pub notifications_enabled: bool,
    /// Zero means the file did not carry one; see [`UserRecord::fill_missing_interval`].
    #[serde(default, rename = "check_interval")]
    pub check_interval_secs: u64,
    /// Ids from the latest check, grouped by the keyword that produced them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub seen_by_keyword: BTreeMap<String, Vec<String>>,
}

impl UserRecord {
    pub fn new(check_interval_secs: u64) -> Self {
        Self {
            keywords: Vec::new(),
            last_check: None,
            last_seen_ids: Vec::new(),
            notifications_enabled: true,
            check_interval_secs,
            seen_by_keyword: BTreeMap::new(),
        }
    }

    /// Gives records loaded without a `check_interval` the process-wide default.
    pub fn fill_missing_interval(&mut self, default_check_interval_secs: u64) {
        if self.check_interval_secs == 0 {
            self.check_interval_secs = default_check_interval_secs;
        }
    }

    /// Appends keywords not already present, preserving order. Returns how many were added.
    pub fn add_keywords<I>(&mut self, keywords: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() || self.keywords.iter().any(|k| k == keyword) {
                continue;
            }
            self.keywords.push(keyword.to_string());
            added += 1;
        }
        added
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let before = self.keywords.len();
        self.keywords.retain(|k| k != keyword);
        self.keywords.len() != before
    }

    pub fn seen_ids(&self) -> HashSet<String> {
        self.last_seen_ids.iter().cloned().collect()
    }

    /// The only way to move `last_seen_ids` and `last_check`; they always change together.
    ///
    /// `fetched` holds the ids each successful keyword returned. A keyword in
    /// `failed_keywords` keeps the ids it had before, so its postings are not
    /// announced again once it recovers. Records written before ids were grouped
    /// hand their whole flat list to the failed keywords once.
    pub fn record_check(
        &mut self,
        fetched: BTreeMap<String, Vec<String>>,
        failed_keywords: &[String],
        checked_at: DateTime<Utc>,
    ) {
        let mut by_keyword = fetched;
        for keyword in failed_keywords {
            let carried = if self.seen_by_keyword.is_empty() {
                self.last_seen_ids.clone()
            } else {
                self.seen_by_keyword.get(keyword).cloned().unwrap_or_default()
            };
            by_keyword.insert(keyword.clone(), carried);
        }

        self.last_seen_ids = {
            let mut unique = HashSet::new();
            by_keyword
                .values()
                .flatten()
                .filter(|id| unique.insert(id.as_str()))
                .cloned()
                .collect()
        };
        self.seen_by_keyword = by_keyword;
        self.last_check = Some(checked_at);
    }

    pub fn toggle_notifications(&mut self) -> bool {
        self.notifications_enabled = !self.notifications_enabled;
        self.notifications_enabled
    }

    pub fn set_check_interval_hours(&mut self, hours: u32) -> Result<(), CoreError> {
        if !INTERVAL_PRESETS_HOURS.contains(&hours) {
            return Err(CoreError::UnsupportedInterval(hours));
        }
        self.check_interval_secs = u64::from(hours) * 3600;
        Ok(())
    }

    pub fn check_interval_hours(&self) -> u64 {
        self.check_interval_secs / 3600
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        is_due(self.last_check, self.check_interval_secs, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenizerState {
    Outside,
    Unquoted,
    Quoted,
}

fn is_quote(ch: char) -> bool {
    matches!(ch, '"' | '“' | '”' | '«' | '»')
}

fn flush_token(current: &mut String, out: &mut Vec<String>) {
    let token = current.trim();
    if !token.is_empty() {
        out.push(token.to_string());
    }
    current.clear();
}

/// Splits `/add_keywords` arguments on whitespace, keeping quoted spans together.
///
/// `python "machine learning" java` yields three keywords. An opening quote in the
/// middle of a bare word continues that word; an unterminated quote runs to the end.
pub fn parse_keywords(input: &str) -> Vec<String> {
    let mut state = TokenizerState::Outside;
    let mut current = String::new();
    let mut keywords = Vec::new();

    for ch in input.chars() {
        state = match state {
            TokenizerState::Quoted if is_quote(ch) => {
                flush_token(&mut current, &mut keywords);
                TokenizerState::Outside
            }
            TokenizerState::Quoted => {
                current.push(ch);
                TokenizerState::Quoted
            }
            _ if is_quote(ch) => TokenizerState::Quoted,
            TokenizerState::Outside if ch.is_whitespace() => TokenizerState::Outside,
            TokenizerState::Unquoted if ch.is_whitespace() => {
                flush_token(&mut current, &mut keywords);
                TokenizerState::Outside
            }
            TokenizerState::Outside | TokenizerState::Unquoted => {
                current.push(ch);
                TokenizerState::Unquoted
            }
        };
    }
    flush_token(&mut current, &mut keywords);
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(id: &str, published_at: &str) -> Posting {
        Posting {
            id: id.to_string(),
            title: format!("Vacancy {id}"),
            url: format!("https://hh.ru/vacancy/{id}"),
            employer_name: "Acme".to_string(),
            salary: None,
            published_at: parse_published_at(published_at).unwrap(),
        }
    }

    fn ids(postings: &[Posting]) -> Vec<&str> {
        postings.iter().map(|p| p.id.as_str()).collect()
    }

    fn fetched(groups: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        groups
            .iter()
            .map(|(keyword, ids)| {
                (keyword.to_string(), ids.iter().map(|id| id.to_string()).collect())
            })
            .collect()
    }

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn published_at_accepts_compact_and_colon_offsets() {
        let compact = parse_published_at("2024-01-15T10:00:00+0300").unwrap();
        let colon = parse_published_at("2024-01-15T10:00:00+03:00").unwrap();
        let zulu = parse_published_at("2024-01-15T07:00:00Z").unwrap();
        assert_eq!(compact, colon);
        assert_eq!(compact, zulu);
        assert!(parse_published_at("yesterday").is_err());
    }

    #[test]
    fn merge_drops_duplicate_ids_and_keeps_every_distinct_one() {
        let python = vec![
            posting("1", "2024-01-15T10:00:00Z"),
            posting("2", "2024-01-15T11:00:00Z"),
        ];
        let java = vec![
            posting("2", "2024-01-15T11:00:00Z"),
            posting("3", "2024-01-15T09:00:00Z"),
        ];
        let merged = merge_postings(vec![python, java]);
        assert_eq!(ids(&merged), vec!["2", "1", "3"]);
    }

    #[test]
    fn merge_first_occurrence_wins() {
        let mut first = posting("7", "2024-01-15T10:00:00Z");
        first.title = "first".into();
        let mut second = posting("7", "2024-01-15T10:00:00Z");
        second.title = "second".into();
        let merged = merge_postings(vec![vec![first], vec![second]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "first");
    }

    #[test]
    fn merge_is_stable_for_equal_timestamps() {
        let merged = merge_postings(vec![
            vec![posting("a", "2024-01-15T10:00:00Z"), posting("b", "2024-01-15T12:00:00Z")],
            vec![posting("c", "2024-01-15T10:00:00Z"), posting("d", "2024-01-15T13:00:03+03:00")],
        ]);
        // d is 10:00:03Z, so it lands after b and before the a/c tie.
        assert_eq!(ids(&merged), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_postings(Vec::<Vec<Posting>>::new()).is_empty());
        assert!(merge_postings(vec![Vec::new(), Vec::new()]).is_empty());
    }

    #[test]
    fn detect_new_filters_known_ids_and_keeps_order() {
        let postings = vec![
            posting("3", "2024-01-15T12:00:00Z"),
            posting("2", "2024-01-15T11:00:00Z"),
            posting("1", "2024-01-15T10:00:00Z"),
        ];
        let previous: HashSet<String> = ["2".to_string()].into_iter().collect();
        assert_eq!(ids(&detect_new(&postings, &previous)), vec!["3", "1"]);
        assert_eq!(ids(&detect_new(&postings, &HashSet::new())), vec!["3", "2", "1"]);
    }

    #[test]
    fn never_checked_user_is_always_due() {
        let now = utc("2024-01-15T10:00:00Z");
        assert!(is_due(None, 0, now));
        assert!(is_due(None, u64::MAX, now));
    }

    #[test]
    fn due_exactly_at_interval_boundary() {
        let last = utc("2024-01-15T10:00:00Z");
        assert!(!is_due(Some(last), 3600, last + TimeDelta::seconds(3599)));
        assert!(is_due(Some(last), 3600, last + TimeDelta::seconds(3600)));
        assert!(is_due(Some(last), 3600, last + TimeDelta::seconds(7200)));
    }

    #[test]
    fn absurd_interval_is_never_due() {
        let last = utc("2024-01-15T10:00:00Z");
        assert!(!is_due(Some(last), u64::MAX, last + TimeDelta::days(365)));
    }

    #[test]
    fn tokenizer_keeps_quoted_spans() {
        assert_eq!(
            parse_keywords(r#"python "machine learning" java"#),
            vec!["python", "machine learning", "java"]
        );
    }

    #[test]
    fn tokenizer_handles_typographic_quotes_and_noise() {
        assert_eq!(
            parse_keywords("  «data engineer»   “rust  dev”  go "),
            vec!["data engineer", "rust  dev", "go"]
        );
        assert!(parse_keywords(r#"  "" "#).is_empty());
        assert!(parse_keywords("").is_empty());
    }

    #[test]
    fn tokenizer_quote_inside_word_and_unterminated_quote() {
        assert_eq!(parse_keywords(r#"c"++ dev" rust"#), vec!["c++ dev", "rust"]);
        assert_eq!(parse_keywords(r#"go "senior backend"#), vec!["go", "senior backend"]);
    }

    #[test]
    fn adding_keywords_skips_duplicates() {
        let mut record = UserRecord::new(DEFAULT_CHECK_INTERVAL_SECS);
        let added = record.add_keywords(parse_keywords(r#"python "machine learning" java"#));
        assert_eq!(added, 3);
        let added = record.add_keywords(parse_keywords("java python kotlin"));
        assert_eq!(added, 1);
        assert_eq!(record.keywords, vec!["python", "machine learning", "java", "kotlin"]);
    }

    #[test]
    fn keyword_removal_by_value() {
        let mut record = UserRecord::new(60);
        record.add_keywords(["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(record.remove_keyword("b"));
        assert!(!record.remove_keyword("b"));
        assert_eq!(record.keywords, vec!["a", "c"]);
    }

    #[test]
    fn interval_must_be_a_preset() {
        let mut record = UserRecord::new(DEFAULT_CHECK_INTERVAL_SECS);
        record.set_check_interval_hours(6).unwrap();
        assert_eq!(record.check_interval_secs, 6 * 3600);
        assert_eq!(record.check_interval_hours(), 6);
        assert_eq!(
            record.set_check_interval_hours(5),
            Err(CoreError::UnsupportedInterval(5))
        );
        assert_eq!(record.check_interval_hours(), 6);
    }

    #[test]
    fn record_check_moves_ids_and_timestamp_together() {
        let mut record = UserRecord::new(3600);
        let now = utc("2024-01-15T10:00:00Z");
        record.record_check(fetched(&[("rust", &["1", "2"])]), &[], now);
        assert_eq!(record.last_check, Some(now));
        assert_eq!(record.seen_ids().len(), 2);
        assert!(!record.is_due(now + TimeDelta::minutes(59)));
        assert!(record.is_due(now + TimeDelta::hours(1)));
    }

    #[test]
    fn legacy_state_records_deserialize() {
        let json = r#"{
            "keywords": ["python"],
            "last_check": "2024-01-15T10:30:00.123456",
            "last_vacancies": ["1", "2"],
            "notification_enabled": false,
            "check_interval": 10800
        }"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.keywords, vec!["python"]);
        assert!(record.last_check.is_some());
        assert_eq!(record.last_seen_ids, vec!["1", "2"]);
        assert!(!record.notifications_enabled);
        assert_eq!(record.check_interval_hours(), 3);
    }

    #[test]
    fn sparse_records_fall_back_to_defaults() {
        let mut record: UserRecord = serde_json::from_str(r#"{"last_check": null}"#).unwrap();
        assert_eq!(record.check_interval_secs, 0);
        record.fill_missing_interval(7200);
        assert_eq!(record, UserRecord::new(7200));

        let mut explicit: UserRecord = serde_json::from_str(r#"{"check_interval": 10800}"#).unwrap();
        explicit.fill_missing_interval(7200);
        assert_eq!(explicit.check_interval_secs, 10800);
    }

    #[test]
    fn successful_check_replaces_seen_ids() {
        let mut record = UserRecord::new(3600);
        let now = utc("2024-01-15T10:00:00Z");
        record.record_check(fetched(&[("go", &["1", "2"]), ("rust", &["2", "3"])]), &[], now);
        assert_eq!(record.last_seen_ids, vec!["1", "2", "3"]);

        record.record_check(fetched(&[("go", &["4"]), ("rust", &[])]), &[], now);
        assert_eq!(record.last_seen_ids, vec!["4"]);
    }

    #[test]
    fn failed_keyword_keeps_only_its_own_ids() {
        let mut record = UserRecord::new(3600);
        let now = utc("2024-01-15T10:00:00Z");
        record.record_check(fetched(&[("go", &["1"]), ("rust", &["2"])]), &[], now);

        record.record_check(fetched(&[("go", &["5"])]), &["rust".to_string()], now);
        assert_eq!(record.last_seen_ids, vec!["5", "2"]);
        assert_eq!(record.seen_by_keyword["rust"], vec!["2"]);
    }

    #[test]
    fn permanently_failing_keyword_does_not_grow_seen_ids() {
        let mut record = UserRecord::new(3600);
        let now = utc("2024-01-15T10:00:00Z");
        let broken = ["broken".to_string()];
        for round in 0..50 {
            let live: Vec<String> = (0..100).map(|i| format!("{round}-{i}")).collect();
            let mut batch = BTreeMap::new();
            batch.insert("live".to_string(), live);
            record.record_check(batch, &broken, now);
        }
        assert_eq!(record.last_seen_ids.len(), 100);
        assert!(record.seen_by_keyword["broken"].is_empty());
    }

    #[test]
    fn ungrouped_legacy_ids_carry_over_once() {
        let mut record: UserRecord =
            serde_json::from_str(r#"{"keywords": ["go", "rust"], "last_vacancies": ["7", "8"]}"#).unwrap();
        let now = utc("2024-01-15T10:00:00Z");

        record.record_check(fetched(&[("go", &["9"])]), &["rust".to_string()], now);
        assert_eq!(record.seen_by_keyword["rust"], vec!["7", "8"]);
        assert_eq!(record.last_seen_ids, vec!["9", "7", "8"]);

        record.record_check(fetched(&[("go", &["10"])]), &["rust".to_string()], now);
        assert_eq!(record.last_seen_ids, vec!["10", "7", "8"]);

        record.record_check(fetched(&[("go", &["10"]), ("rust", &["11"])]), &[], now);
        assert_eq!(record.last_seen_ids, vec!["10", "11"]);
    }

    #[test]
    fn records_round_trip_through_rfc3339() {
        let mut record = UserRecord::new(3600);
        record.record_check(fetched(&[("rust", &["9"])]), &[], utc("2024-01-15T10:00:00Z"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"last_vacancies\":[\"9\"]"));
        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
