use crate::window::TimeWindow;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const START_PLACEHOLDER: &str = "{start_time}";
pub const END_PLACEHOLDER: &str = "{end_time}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("query template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),

    #[error("invalid strftime format '{0}'")]
    InvalidFormat(String),
}

/// How window bounds are rendered into query text.
///
/// Configured as `iso8601`, `epoch`, `epoch_ms` or any strftime string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeFormat {
    /// `2024-01-01T00:00:00Z`
    Iso8601,
    Epoch,
    EpochMs,
    Strftime(String),
}

impl From<String> for TimeFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "iso8601" => TimeFormat::Iso8601,
            "epoch" => TimeFormat::Epoch,
            "epoch_ms" => TimeFormat::EpochMs,
            _ => TimeFormat::Strftime(value),
        }
    }
}

impl From<TimeFormat> for String {
    fn from(value: TimeFormat) -> Self {
        match value {
            TimeFormat::Iso8601 => "iso8601".to_string(),
            TimeFormat::Epoch => "epoch".to_string(),
            TimeFormat::EpochMs => "epoch_ms".to_string(),
            TimeFormat::Strftime(fmt) => fmt,
        }
    }
}

impl TimeFormat {
    /// Reject strftime strings chrono cannot render; formatting them would panic.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if let TimeFormat::Strftime(fmt) = self {
            if fmt.is_empty() || StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
                return Err(TemplateError::InvalidFormat(fmt.clone()));
            }
        }
        Ok(())
    }

    pub fn render(&self, instant: DateTime<Utc>) -> String {
        match self {
            TimeFormat::Iso8601 => instant.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            TimeFormat::Epoch => instant.timestamp().to_string(),
            TimeFormat::EpochMs => instant.timestamp_millis().to_string(),
            TimeFormat::Strftime(fmt) => instant.format(fmt).to_string(),
        }
    }
}

/// Source query text with `{start_time}` / `{end_time}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    text: String,
    format: TimeFormat,
}

impl QueryTemplate {
    pub fn new(text: impl Into<String>, format: TimeFormat) -> Result<Self, TemplateError> {
        let text = text.into();
        if !text.contains(START_PLACEHOLDER) {
            return Err(TemplateError::MissingPlaceholder(START_PLACEHOLDER));
        }
        if !text.contains(END_PLACEHOLDER) {
            return Err(TemplateError::MissingPlaceholder(END_PLACEHOLDER));
        }
        format.validate()?;

        Ok(Self { text, format })
    }

    pub fn render(&self, window: &TimeWindow) -> String {
        self.text
            .replace(START_PLACEHOLDER, &self.format.render(window.start()))
            .replace(END_PLACEHOLDER, &self.format.render(window.end()))
    }
}
