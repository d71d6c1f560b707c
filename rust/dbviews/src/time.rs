//! Date-time handling for view parameters and result columns.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use thiserror::Error;

/// The only accepted shape for caller-supplied parameter values.
pub const PARAMETER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date format pattern '{0}'")]
pub struct InvalidDateFormat(pub String);

/// A strftime pattern checked once at startup, so formatting never fails at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat(String);

impl DateFormat {
    pub fn new(pattern: impl Into<String>) -> Result<Self, InvalidDateFormat> {
        let pattern = pattern.into();
        if pattern.trim().is_empty()
            || StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error))
        {
            return Err(InvalidDateFormat(pattern));
        }

        // Offset and zone specifiers parse fine but cannot render a naive value.
        let mut rendered = String::new();
        if write!(rendered, "{}", NaiveDateTime::default().format(&pattern)).is_err() {
            return Err(InvalidDateFormat(pattern));
        }
        Ok(Self(pattern))
    }

    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn format(&self, value: &NaiveDateTime) -> String {
        value.format(&self.0).to_string()
    }

    pub fn parse(&self, raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, &self.0).ok()
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self(PARAMETER_FORMAT.to_string())
    }
}

/// How date/time columns are rendered in response rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputDateFormat {
    #[default]
    Iso8601,
    Pattern(DateFormat),
}

impl OutputDateFormat {
    pub fn timestamp(&self, value: &NaiveDateTime) -> String {
        match self {
            OutputDateFormat::Iso8601 => value.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            OutputDateFormat::Pattern(format) => format.format(value),
        }
    }

    pub fn timestamptz(&self, value: &DateTime<Utc>) -> String {
        match self {
            OutputDateFormat::Iso8601 => value.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            OutputDateFormat::Pattern(format) => format.format(&value.naive_utc()),
        }
    }

    pub fn date(&self, value: &NaiveDate) -> String {
        match self {
            OutputDateFormat::Iso8601 => value.format("%Y-%m-%d").to_string(),
            OutputDateFormat::Pattern(format) => format.format(&value.and_time(NaiveTime::MIN)),
        }
    }

    pub fn time(&self, value: &NaiveTime) -> String {
        value.format("%H:%M:%S%.f").to_string()
    }
}

/// Removes one matching pair of surrounding quotes, if present.
pub fn strip_quotes(raw: &str) -> &str {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

/// Parses a caller-supplied `YYYY-MM-DD HH:MM:SS` value, quotes allowed.
pub fn parse_parameter(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(strip_quotes(raw.trim()), PARAMETER_FORMAT).ok()
}

/// Renders a timestamp as a single-quoted SQL literal in the database's format.
pub fn sql_literal(value: &NaiveDateTime, format: &DateFormat) -> String {
    format!("'{}'", format.format(value))
}
