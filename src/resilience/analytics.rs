//! Error classification, deduplication and retention.
//!
//! Every error reported by the streaming and retry layers lands here. Records are
//! grouped by a normalized *signature* (source plus the message with ids, quoted
//! values and hex tokens replaced by placeholders) so that structurally identical
//! failures count against one counter. When a signature reaches
//! `critical_error_threshold`, listeners receive a single critical-pattern signal.

use crate::core::config::AnalyticsConfig;
use crate::core::errors::{ErrorCategory, FeedError};
use crate::core::traits::ErrorListener;
use chrono::{DateTime, TimeDelta as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Hex runs at least this long are treated as opaque identifiers
const MIN_HEX_TOKEN_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub id: u64,
    pub source: String,
    pub message: String,
    pub code: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
    pub fatal: bool,
    pub context: Vec<(String, String)>,
}

/// Raised once when one signature repeats `critical_error_threshold` times
#[derive(Debug, Clone, Serialize)]
pub struct CriticalPattern {
    pub signature: String,
    pub source: String,
    pub count: u64,
    pub sample_message: String,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub fatal: bool,
    /// Overrides the configured sample rate for this report
    pub sample_rate: Option<f64>,
    pub context: Vec<(String, String)>,
}

impl ReportOptions {
    pub fn fatal() -> Self {
        Self {
            fatal: true,
            ..Self::default()
        }
    }

    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.push((key.into(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    pub source: Option<String>,
    pub category: Option<ErrorCategory>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ErrorFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn category(category: ErrorCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &ErrorRecord) -> bool {
        self.source.as_deref().map_or(true, |s| s == record.source)
            && self.category.map_or(true, |c| c == record.category)
            && self.since.map_or(true, |t| record.timestamp >= t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCount {
    pub signature: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    /// Errors recorded since construction (sampled-out reports excluded)
    pub total_recorded: u64,
    pub retained: usize,
    pub last_5_minutes: usize,
    pub last_15_minutes: usize,
    pub last_60_minutes: usize,
    pub by_source: HashMap<String, usize>,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub top_signatures: Vec<SignatureCount>,
}

struct SignatureCounter {
    count: u64,
    first_seen: DateTime<Utc>,
    critical_emitted: bool,
}

struct AnalyticsState {
    records: VecDeque<ErrorRecord>,
    signatures: HashMap<String, SignatureCounter>,
    next_id: u64,
    total_recorded: u64,
}

/// Shared error sink for the connection managers and the retry executor
pub struct ErrorAnalytics {
    config: AnalyticsConfig,
    state: Mutex<AnalyticsState>,
    listeners: RwLock<Vec<Arc<dyn ErrorListener>>>,
}

impl std::fmt::Debug for ErrorAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorAnalytics")
            .field("config", &self.config)
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for ErrorAnalytics {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

impl ErrorAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            state: Mutex::new(AnalyticsState {
                records: VecDeque::with_capacity(config.max_errors.min(1024)),
                signatures: HashMap::new(),
                next_id: 1,
                total_recorded: 0,
            }),
            config,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.listeners.write().push(listener);
    }

    /// Report a typed error. Returns the stored record, or `None` when sampled out.
    pub fn report_error(
        &self,
        source: &str,
        error: &FeedError,
        options: ReportOptions,
    ) -> Option<ErrorRecord> {
        self.report(
            source,
            &error.to_string(),
            error.code(),
            error.category(),
            options,
        )
    }

    /// Report an error that only exists as text
    pub fn report_message(
        &self,
        source: &str,
        message: &str,
        category: ErrorCategory,
        options: ReportOptions,
    ) -> Option<ErrorRecord> {
        self.report(source, message, "MESSAGE", category, options)
    }

    fn report(
        &self,
        source: &str,
        message: &str,
        code: &str,
        category: ErrorCategory,
        options: ReportOptions,
    ) -> Option<ErrorRecord> {
        if self.sampled_out(source, &options) {
            debug!(source, code, "error report sampled out");
            return None;
        }

        let (record, critical) = self.track_error_at(source, message, code, category, options, Utc::now());

        if record.fatal {
            error!(
                id = record.id,
                source = %record.source,
                category = %record.category,
                signature = %record.signature,
                message = %record.message,
                "fatal error recorded"
            );
        } else {
            warn!(
                id = record.id,
                source = %record.source,
                category = %record.category,
                message = %record.message,
                "error recorded"
            );
        }

        let listeners: Vec<Arc<dyn ErrorListener>> = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_error(&record);
        }

        if let Some(pattern) = critical {
            error!(
                signature = %pattern.signature,
                source = %pattern.source,
                count = pattern.count,
                "critical error pattern detected"
            );
            for listener in &listeners {
                listener.on_critical_pattern(&pattern);
            }
        }

        Some(record)
    }

    fn sampled_out(&self, source: &str, options: &ReportOptions) -> bool {
        if options.fatal {
            return false;
        }
        let rate = options
            .sample_rate
            .unwrap_or_else(|| self.config.sample_rate_for(source));
        if rate >= 1.0 {
            return false;
        }
        rand::random::<f64>() >= rate
    }

    /// Store a record, bump its signature counter and evict beyond `max_errors`
    pub(crate) fn track_error_at(
        &self,
        source: &str,
        message: &str,
        code: &str,
        category: ErrorCategory,
        options: ReportOptions,
        now: DateTime<Utc>,
    ) -> (ErrorRecord, Option<CriticalPattern>) {
        let signature = error_signature(source, message);
        let mut state = self.state.lock();

        let id = state.next_id;
        state.next_id += 1;
        state.total_recorded += 1;

        let record = ErrorRecord {
            id,
            source: source.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            category,
            timestamp: now,
            signature: signature.clone(),
            fatal: options.fatal,
            context: options.context,
        };

        let threshold = self.config.critical_error_threshold;
        let counter = state
            .signatures
            .entry(signature.clone())
            .or_insert_with(|| SignatureCounter {
                count: 0,
                first_seen: now,
                critical_emitted: false,
            });
        counter.count += 1;

        let critical = if counter.count >= threshold && !counter.critical_emitted {
            counter.critical_emitted = true;
            Some(CriticalPattern {
                signature,
                source: source.to_string(),
                count: counter.count,
                sample_message: message.to_string(),
                first_seen: counter.first_seen,
            })
        } else {
            None
        };

        state.records.push_back(record.clone());
        while state.records.len() > self.config.max_errors {
            state.records.pop_front();
        }

        (record, critical)
    }

    /// Drop records older than the retention window and orphaned signature counters
    pub fn clean_old_errors(&self) -> usize {
        self.clean_old_errors_at(Utc::now())
    }

    pub(crate) fn clean_old_errors_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            .checked_sub_signed(to_chrono(self.config.retention()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut state = self.state.lock();

        let before = state.records.len();
        state.records.retain(|r| r.timestamp >= cutoff);
        let removed = before - state.records.len();

        let live: HashSet<String> = state.records.iter().map(|r| r.signature.clone()).collect();
        state.signatures.retain(|signature, _| live.contains(signature));

        if removed > 0 {
            debug!(removed, retained = state.records.len(), "cleaned old errors");
        }
        removed
    }

    /// Run `clean_old_errors` every `cleanup_interval` until the analytics is dropped
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(analytics) => {
                        analytics.clean_old_errors();
                    }
                    None => break,
                }
            }
        })
    }

    /// Newest-first records matching the filter
    pub fn recent_errors(&self, filter: &ErrorFilter) -> Vec<ErrorRecord> {
        let state = self.state.lock();
        state
            .records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Occurrences of a signature still tracked
    pub fn signature_count(&self, signature: &str) -> u64 {
        self.state
            .lock()
            .signatures
            .get(signature)
            .map_or(0, |c| c.count)
    }

    pub fn stats(&self) -> ErrorStats {
        self.stats_at(Utc::now())
    }

    pub(crate) fn stats_at(&self, now: DateTime<Utc>) -> ErrorStats {
        let state = self.state.lock();
        let within = |minutes: i64| {
            let since = now - ChronoDuration::minutes(minutes);
            state.records.iter().filter(|r| r.timestamp >= since).count()
        };

        let mut by_source: HashMap<String, usize> = HashMap::new();
        let mut by_category: HashMap<ErrorCategory, usize> = HashMap::new();
        for record in &state.records {
            *by_source.entry(record.source.clone()).or_insert(0) += 1;
            *by_category.entry(record.category).or_insert(0) += 1;
        }

        let mut top_signatures: Vec<SignatureCount> = state
            .signatures
            .iter()
            .map(|(signature, counter)| SignatureCount {
                signature: signature.clone(),
                count: counter.count,
            })
            .collect();
        top_signatures.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.signature.cmp(&b.signature)));
        top_signatures.truncate(self.config.top_signatures);

        ErrorStats {
            total_recorded: state.total_recorded,
            retained: state.records.len(),
            last_5_minutes: within(5),
            last_15_minutes: within(15),
            last_60_minutes: within(60),
            by_source,
            by_category,
            top_signatures,
        }
    }
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// `source` plus the message with digit runs, quoted substrings and long hex
/// tokens replaced by placeholders
pub fn error_signature(source: &str, message: &str) -> String {
    format!("{}:{}", source, normalize_message(message))
}

fn normalize_message(message: &str) -> String {
    let chars: Vec<char> = message.chars().collect();
    let mut out = String::with_capacity(message.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' {
            if let Some(end) = chars[i + 1..].iter().position(|&q| q == c) {
                out.push_str("<str>");
                i += end + 2;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }

        if c.is_ascii_alphanumeric() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let token: String = chars[start..i].iter().collect();
            if is_hex_token(&token) {
                out.push_str("<hex>");
            } else {
                push_with_digit_placeholders(&mut out, &token);
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

fn is_hex_token(token: &str) -> bool {
    if let Some(rest) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit());
    }
    token.len() >= MIN_HEX_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

fn push_with_digit_placeholders(out: &mut String, token: &str) {
    let mut in_digits = false;
    for c in token.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push_str("<n>");
                in_digits = true;
            }
        } else {
            in_digits = false;
            out.push(c);
        }
    }
}
