use crate::config::types::TimestampConfig;
use crate::router::Clock;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("pattern missing 'ts' capture group")]
    MissingTsGroup,

    #[error("failed to parse timestamp '{value}' with format '{format}': {reason}")]
    Parse {
        value: String,
        format: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    fn parse(format: &str) -> Self {
        match format {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            TimestampFormat::Strptime(fmt) => fmt,
            TimestampFormat::Iso8601 => "iso8601",
            TimestampFormat::Epoch => "epoch",
            TimestampFormat::EpochMs => "epoch_ms",
        }
    }
}

/// Pulls a record's own timestamp out of a log line.
#[derive(Debug)]
pub struct TimestampExtractor {
    pattern: Regex,
    format: TimestampFormat,
}

impl TimestampExtractor {
    /// `pattern` must contain a named capture group `ts`; `format` is one of
    /// `iso8601`, `epoch`, `epoch_ms` or a strptime format string.
    pub fn new(pattern: &str, format: &str) -> Result<Self, TimestampError> {
        let pattern = Regex::new(pattern)?;

        if pattern.capture_names().all(|name| name != Some("ts")) {
            return Err(TimestampError::MissingTsGroup);
        }

        Ok(Self {
            pattern,
            format: TimestampFormat::parse(format),
        })
    }

    /// Returns `Ok(None)` when the pattern does not match the line.
    pub fn extract(&self, line: &str) -> Result<Option<DateTime<Utc>>, TimestampError> {
        let Some(value) = self
            .pattern
            .captures(line)
            .and_then(|caps| caps.name("ts"))
            .map(|m| m.as_str())
        else {
            return Ok(None);
        };

        let parsed = match &self.format {
            TimestampFormat::Iso8601 => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
            TimestampFormat::Epoch => value
                .parse::<i64>()
                .map_err(|e| e.to_string())
                .and_then(|secs| {
                    Utc.timestamp_opt(secs, 0)
                        .single()
                        .ok_or_else(|| "timestamp out of range".to_string())
                }),
            TimestampFormat::EpochMs => value
                .parse::<i64>()
                .map_err(|e| e.to_string())
                .and_then(|millis| {
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .ok_or_else(|| "timestamp out of range".to_string())
                }),
            TimestampFormat::Strptime(fmt) => parse_strptime(value, fmt),
        };

        parsed.map(Some).map_err(|reason| TimestampError::Parse {
            value: value.to_string(),
            format: self.format.name().to_string(),
            reason,
        })
    }
}

fn parse_strptime(value: &str, format: &str) -> Result<DateTime<Utc>, String> {
    if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
        DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| e.to_string())
    } else {
        // No zone in the format, read it as UTC
        NaiveDateTime::parse_from_str(value, format)
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| e.to_string())
    }
}

/// Assigns each line the timestamp it is shipped with, in epoch milliseconds.
#[derive(Clone)]
pub struct TimestampResolver {
    clock: Arc<dyn Clock>,
    extractor: Option<Arc<TimestampExtractor>>,
}

impl TimestampResolver {
    pub fn ingestion_time(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            extractor: None,
        }
    }

    pub fn from_config(
        config: &TimestampConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TimestampError> {
        let extractor = match config {
            TimestampConfig::Ingestion => None,
            TimestampConfig::Record { pattern, format } => {
                Some(Arc::new(TimestampExtractor::new(pattern, format)?))
            }
        };
        Ok(Self { clock, extractor })
    }

    /// Record time when configured and present, otherwise the clock's now.
    pub fn resolve(&self, line: &str) -> i64 {
        if let Some(extractor) = &self.extractor {
            match extractor.extract(line) {
                Ok(Some(ts)) => return ts.timestamp_millis(),
                Ok(None) => {
                    tracing::trace!("no record timestamp, using ingestion time");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable record timestamp, using ingestion time");
                }
            }
        }
        self.clock.now().timestamp_millis()
    }
}
