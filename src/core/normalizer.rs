//! Maps raw upstream records to listing candidates.
//!
//! Every source-specific field name lives here, including the page envelope,
//! so the rest of the pipeline only ever sees [`ListingCandidate`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::text::{
    canonicalize_company, canonicalize_location, collapse_whitespace, is_remote_location, strip_markup,
};
use crate::models::{ListingCandidate, Source};

const HOURS_PER_YEAR: f64 = 2080.0;
const DAYS_PER_YEAR: f64 = 260.0;
const MONTHS_PER_YEAR: f64 = 12.0;

static RE_SALARY_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(k)?\b").unwrap());

/// Why a record was dropped instead of normalized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Field layout of one upstream source
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema {
    /// Array of records inside the page envelope; empty means the body is the array
    pub records_field: &'static str,
    /// Total result count, used to derive `has_more`
    pub total_field: Option<&'static str>,
    /// Explicit `has_more` flag
    pub has_more_field: Option<&'static str>,
    pub keywords_param: &'static str,
    pub location_param: Option<&'static str>,
    pub page_param: &'static str,
    pub page_size_param: &'static str,
    pub posted_after_param: Option<&'static str>,
    pub id: &'static str,
    pub title: &'static str,
    pub company: &'static str,
    pub location: &'static str,
    pub salary_min: Option<&'static str>,
    pub salary_max: Option<&'static str>,
    /// Free-text salary ("$120k - $150k")
    pub salary_text: Option<&'static str>,
    pub currency: Option<&'static str>,
    pub description: &'static str,
    pub posted_at: &'static str,
    pub is_open: Option<&'static str>,
    pub default_currency: &'static str,
}

impl SourceSchema {
    pub fn for_source(source: Source) -> &'static SourceSchema {
        match source {
            Source::Adzuna => &ADZUNA,
            Source::Remotive => &REMOTIVE,
            Source::Jooble => &JOOBLE,
            Source::Generic => &GENERIC,
        }
    }

    /// Split a page body into its records and whether another page follows
    pub fn extract_page(
        &self,
        body: &Value,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<Value>, bool), String> {
        let records = if self.records_field.is_empty() {
            body.as_array()
        } else {
            lookup(body, self.records_field).and_then(Value::as_array)
        }
        .ok_or_else(|| format!("missing records array '{}'", self.records_field))?
        .clone();

        let explicit = self
            .has_more_field
            .and_then(|f| lookup(body, f))
            .and_then(Value::as_bool);

        let has_more = match explicit {
            Some(flag) => flag,
            None => match self.total_field.and_then(|f| lookup(body, f)).and_then(Value::as_u64) {
                Some(total) => u64::from(page) * u64::from(page_size) < total,
                None => records.len() as u64 >= u64::from(page_size),
            },
        };

        let has_more = has_more && !records.is_empty();
        Ok((records, has_more))
    }
}

static ADZUNA: SourceSchema = SourceSchema {
    records_field: "results",
    total_field: Some("count"),
    has_more_field: None,
    keywords_param: "what",
    location_param: Some("where"),
    page_param: "page",
    page_size_param: "results_per_page",
    posted_after_param: None,
    id: "id",
    title: "title",
    company: "company.display_name",
    location: "location.display_name",
    salary_min: Some("salary_min"),
    salary_max: Some("salary_max"),
    salary_text: None,
    currency: None,
    description: "description",
    posted_at: "created",
    is_open: None,
    default_currency: "GBP",
};

static REMOTIVE: SourceSchema = SourceSchema {
    records_field: "jobs",
    total_field: None,
    has_more_field: None,
    keywords_param: "search",
    location_param: None,
    page_param: "page",
    page_size_param: "limit",
    posted_after_param: None,
    id: "id",
    title: "title",
    company: "company_name",
    location: "candidate_required_location",
    salary_min: None,
    salary_max: None,
    salary_text: Some("salary"),
    currency: None,
    description: "description",
    posted_at: "publication_date",
    is_open: None,
    default_currency: "USD",
};

static JOOBLE: SourceSchema = SourceSchema {
    records_field: "jobs",
    total_field: Some("totalCount"),
    has_more_field: None,
    keywords_param: "keywords",
    location_param: Some("location"),
    page_param: "page",
    page_size_param: "ResultOnPage",
    posted_after_param: Some("datecreatedfrom"),
    id: "id",
    title: "title",
    company: "company",
    location: "location",
    salary_min: None,
    salary_max: None,
    salary_text: Some("salary"),
    currency: None,
    description: "snippet",
    posted_at: "updated",
    is_open: None,
    default_currency: "USD",
};

static GENERIC: SourceSchema = SourceSchema {
    records_field: "data",
    total_field: Some("total"),
    has_more_field: Some("has_more"),
    keywords_param: "q",
    location_param: Some("location"),
    page_param: "page",
    page_size_param: "page_size",
    posted_after_param: Some("posted_after"),
    id: "id",
    title: "title",
    company: "company",
    location: "location",
    salary_min: Some("salary_min"),
    salary_max: Some("salary_max"),
    salary_text: Some("salary"),
    currency: Some("currency"),
    description: "description",
    posted_at: "posted_at",
    is_open: Some("is_open"),
    default_currency: "USD",
};

/// Conversion rates to USD
#[derive(Debug, Clone)]
pub struct CurrencyTable {
    rates: HashMap<String, f64>,
}

impl CurrencyTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect();
        Self { rates }
    }

    /// Built-in rates with `overrides` applied on top
    pub fn with_overrides(overrides: HashMap<String, f64>) -> Self {
        let mut table = Self::default();
        for (code, rate) in overrides {
            table.rates.insert(code.to_ascii_uppercase(), rate);
        }
        table
    }

    pub fn to_usd(&self, amount: f64, currency: &str) -> Option<f64> {
        self.rates
            .get(&currency.to_ascii_uppercase())
            .map(|rate| amount * rate)
    }
}

impl Default for CurrencyTable {
    fn default() -> Self {
        let rates = [("USD", 1.0), ("EUR", 1.08), ("GBP", 1.27), ("CAD", 0.73), ("AUD", 0.66)]
            .into_iter()
            .map(|(c, r)| (c.to_string(), r))
            .collect();
        Self { rates }
    }
}

/// Pure raw-record to candidate mapping
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    currencies: CurrencyTable,
}

impl Normalizer {
    pub fn new(currencies: CurrencyTable) -> Self {
        Self { currencies }
    }

    /// Normalize a single record; `now` stands in for a missing posting date
    pub fn normalize(
        &self,
        source: Source,
        raw: &Value,
        now: DateTime<Utc>,
    ) -> Result<ListingCandidate, DropReason> {
        if !raw.is_object() {
            return Err(DropReason::NotAnObject);
        }
        let schema = SourceSchema::for_source(source);

        let title = text_field(raw, schema.title)
            .map(|t| collapse_whitespace(&strip_markup(&t)))
            .filter(|t| !t.is_empty())
            .ok_or(DropReason::MissingField("title"))?;

        let company = text_field(raw, schema.company)
            .map(|c| canonicalize_company(&strip_markup(&c)))
            .filter(|c| !c.is_empty())
            .ok_or(DropReason::MissingField("company"))?;

        let raw_location = text_field(raw, schema.location).unwrap_or_default();
        let location = canonicalize_location(&raw_location);
        let remote = location == "remote" || is_remote_location(&raw_location);

        let description = text_field(raw, schema.description)
            .map(|d| collapse_whitespace(&strip_markup(&d)))
            .unwrap_or_default();

        let (salary_min, salary_max) = self.salary_range(schema, raw);

        let upstream_posted_at = lookup(raw, schema.posted_at).and_then(parse_timestamp);

        let is_open = schema
            .is_open
            .and_then(|f| lookup(raw, f))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let content_fingerprint = content_fingerprint(&title, &company, &location, &description);

        let source_id = text_field(raw, schema.id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| content_fingerprint.clone());

        Ok(ListingCandidate {
            source,
            source_id,
            title,
            company,
            location,
            remote,
            salary_min,
            salary_max,
            description,
            posted_at: upstream_posted_at.unwrap_or(now),
            posted_at_inferred: upstream_posted_at.is_none(),
            is_open,
            content_fingerprint,
        })
    }

    /// Normalize a page, returning the candidates and the number of dropped records
    pub fn normalize_page(
        &self,
        source: Source,
        records: &[Value],
        now: DateTime<Utc>,
    ) -> (Vec<ListingCandidate>, u64) {
        let mut dropped = 0;
        let candidates = records
            .iter()
            .filter_map(|raw| match self.normalize(source, raw, now) {
                Ok(candidate) => Some(candidate),
                Err(reason) => {
                    dropped += 1;
                    tracing::debug!(source = %source, %reason, "Dropping upstream record");
                    None
                }
            })
            .collect();
        (candidates, dropped)
    }

    fn salary_range(&self, schema: &SourceSchema, raw: &Value) -> (Option<i64>, Option<i64>) {
        let salary_text = schema.salary_text.and_then(|f| text_field(raw, f));
        let currency = schema
            .currency
            .and_then(|f| text_field(raw, f))
            .or_else(|| salary_text.as_deref().and_then(currency_from_text))
            .unwrap_or_else(|| schema.default_currency.to_string());

        let numeric_min = schema.salary_min.and_then(|f| lookup(raw, f)).and_then(number);
        let numeric_max = schema.salary_max.and_then(|f| lookup(raw, f)).and_then(number);

        let (min, max) = if numeric_min.is_some() || numeric_max.is_some() {
            (numeric_min, numeric_max)
        } else if let Some(text) = salary_text.as_deref() {
            parse_salary_text(text)
        } else {
            (None, None)
        };

        let to_usd = |amount: f64| {
            self.currencies
                .to_usd(amount, &currency)
                .map(|usd| usd.round() as i64)
        };

        match (min.and_then(&to_usd), max.and_then(&to_usd)) {
            (Some(lo), Some(hi)) if lo > hi => (Some(hi), Some(lo)),
            other => other,
        }
    }
}

/// Hex SHA-256 over the normalized identifying fields
pub fn content_fingerprint(title: &str, company: &str, location: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [title, company, location, description] {
        hasher.update(collapse_whitespace(&part.to_lowercase()).as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Parse a free-text salary into an annual (min, max) in the text's own currency
pub fn parse_salary_text(text: &str) -> (Option<f64>, Option<f64>) {
    let lowered = text.to_lowercase();
    let multiplier = if lowered.contains("hour") || lowered.contains("/hr") || lowered.contains("hourly") {
        HOURS_PER_YEAR
    } else if lowered.contains("month") || lowered.contains("/mo") {
        MONTHS_PER_YEAR
    } else if lowered.contains("day") || lowered.contains("daily") {
        DAYS_PER_YEAR
    } else {
        1.0
    };

    let amounts: Vec<f64> = RE_SALARY_AMOUNT
        .captures_iter(&lowered)
        .filter_map(|cap| {
            let value: f64 = cap.get(1)?.as_str().replace(',', "").parse().ok()?;
            let value = if cap.get(2).is_some() { value * 1000.0 } else { value };
            (value > 0.0).then_some(value * multiplier)
        })
        .collect();

    match amounts.as_slice() {
        [] => (None, None),
        [single] => (Some(*single), Some(*single)),
        [first, second, ..] => (Some(first.min(*second)), Some(first.max(*second))),
    }
}

fn currency_from_text(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    let code = if text.contains('£') || upper.contains("GBP") {
        "GBP"
    } else if text.contains('€') || upper.contains("EUR") {
        "EUR"
    } else if upper.contains("CAD") || upper.contains("C$") {
        "CAD"
    } else if upper.contains("AUD") || upper.contains("A$") {
        "AUD"
    } else if text.contains('$') || upper.contains("USD") {
        "USD"
    } else {
        return None;
    };
    Some(code.to_string())
}

/// Parse the timestamp shapes upstream boards emit into UTC
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    let text = value.as_str()?.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Follow a dotted path into nested objects
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn text_field(value: &Value, path: &str) -> Option<String> {
    match lookup(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
    .filter(|n| *n > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_normalizes_adzuna_record() {
        let raw = json!({
            "id": 4242,
            "title": "Senior <b>Rust</b> Engineer",
            "company": {"display_name": "Acme Ltd"},
            "location": {"display_name": "London, UK"},
            "salary_min": 80000,
            "salary_max": 100000,
            "description": "<p>Build   things</p>",
            "created": "2026-02-27T10:00:00Z"
        });

        let candidate = Normalizer::default().normalize(Source::Adzuna, &raw, now()).unwrap();
        assert_eq!(candidate.source_id, "4242");
        assert_eq!(candidate.title, "Senior Rust Engineer");
        assert_eq!(candidate.company, "acme");
        assert_eq!(candidate.location, "london uk");
        assert_eq!(candidate.description, "Build things");
        // GBP converted to USD
        assert_eq!(candidate.salary_min, Some(101600));
        assert_eq!(candidate.salary_max, Some(127000));
        assert_eq!(candidate.posted_at, Utc.with_ymd_and_hms(2026, 2, 27, 10, 0, 0).unwrap());
        assert!(!candidate.posted_at_inferred);
        assert!(candidate.is_open);
    }

    #[test]
    fn test_parses_remotive_salary_text_and_remote_location() {
        let raw = json!({
            "id": 7,
            "title": "Backend Developer",
            "company_name": "Globex",
            "candidate_required_location": "Worldwide",
            "salary": "$120k - $150k",
            "description": "Go and Postgres",
            "publication_date": "2026-02-20T08:30:00"
        });

        let candidate = Normalizer::default().normalize(Source::Remotive, &raw, now()).unwrap();
        assert!(candidate.remote);
        assert_eq!(candidate.location, "remote");
        assert_eq!(candidate.salary_min, Some(120_000));
        assert_eq!(candidate.salary_max, Some(150_000));
    }

    #[test]
    fn test_annualizes_hourly_salary() {
        let (min, max) = parse_salary_text("45 - 60 per hour");
        assert_eq!(min, Some(45.0 * HOURS_PER_YEAR));
        assert_eq!(max, Some(60.0 * HOURS_PER_YEAR));
        assert_eq!(parse_salary_text("competitive"), (None, None));
    }

    #[test]
    fn test_drops_records_missing_required_fields() {
        let normalizer = Normalizer::default();
        let records = vec![
            json!({"id": "1", "title": "Engineer", "company": "Initech", "description": "x"}),
            json!({"id": "2", "title": "   ", "company": "Initech"}),
            json!({"id": "3", "title": "Engineer"}),
            json!("not an object"),
        ];

        let (candidates, dropped) = normalizer.normalize_page(Source::Generic, &records, now());
        assert_eq!(candidates.len(), 1);
        assert_eq!(dropped, 3);
        assert_eq!(
            normalizer.normalize(Source::Generic, &records[2], now()),
            Err(DropReason::MissingField("company"))
        );
    }

    #[test]
    fn test_missing_source_id_falls_back_to_fingerprint() {
        let raw = json!({"title": "Engineer", "company": "Initech", "description": "x"});
        let candidate = Normalizer::default().normalize(Source::Generic, &raw, now()).unwrap();
        assert_eq!(candidate.source_id, candidate.content_fingerprint);
        assert_eq!(candidate.posted_at, now());
        assert!(candidate.posted_at_inferred);
    }

    #[test]
    fn test_fingerprint_ignores_case_and_spacing() {
        let a = content_fingerprint("Go Engineer", "acme", "berlin", "Build  APIs");
        let b = content_fingerprint("go engineer", "acme", "berlin", "build apis");
        assert_eq!(a, b);
        assert_ne!(a, content_fingerprint("Go Engineer", "acme", "munich", "Build APIs"));
    }

    #[test]
    fn test_parses_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2026-01-02")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2026-01-02 00:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_extracts_page_envelope() {
        let body = json!({"results": [{"id": 1}, {"id": 2}], "count": 5});
        let schema = SourceSchema::for_source(Source::Adzuna);
        let (records, has_more) = schema.extract_page(&body, 1, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert!(has_more);

        let (_, has_more) = schema.extract_page(&body, 3, 2).unwrap();
        assert!(!has_more);

        assert!(schema.extract_page(&json!({"oops": true}), 1, 2).is_err());
    }

    #[test]
    fn test_currency_overrides_merge_over_defaults() {
        let table = CurrencyTable::with_overrides(HashMap::from([("eur".to_string(), 1.10), ("CHF".to_string(), 1.12)]));
        assert!((table.to_usd(100.0, "EUR").unwrap() - 110.0).abs() < 1e-9);
        assert!((table.to_usd(100.0, "gbp").unwrap() - 127.0).abs() < 1e-9);
        assert!(table.to_usd(100.0, "chf").is_some());
        assert_eq!(table.to_usd(100.0, "JPY"), None);
    }
}
