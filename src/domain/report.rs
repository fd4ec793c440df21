use super::request::{RequestInfo, RequestSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Severity attached to an error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Fatal,
}

/// Location summary extracted from the failing stack frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// A normalized error report ready for admission, batching and transmission.
///
/// Reports are immutable once built. The pipeline takes ownership on entry and
/// the report then lives in exactly one place: the current batch, the offline
/// queue, or an in-flight send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub message: String,
    pub error_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackSummary>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Report {
    pub fn builder(message: impl Into<String>) -> ReportBuilder {
        ReportBuilder::new(message)
    }

    /// Size of the report's JSON encoding, used for admission and chunking.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

pub struct ReportBuilder {
    report: Report,
}

impl ReportBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            report: Report {
                id: Uuid::new_v4().to_string(),
                message: message.into(),
                error_type: "Error".to_string(),
                severity: Severity::default(),
                stack: None,
                context: BTreeMap::new(),
                request: None,
                environment: None,
                release: None,
                server_name: None,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.report.error_type = error_type.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.report.severity = severity;
        self
    }

    pub fn stack(mut self, stack: StackSummary) -> Self {
        self.report.stack = Some(stack);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.report.context.insert(key.into(), value.into());
        self
    }

    /// Captures request context through the framework-neutral interface.
    pub fn request(mut self, source: &dyn RequestSource) -> Self {
        self.report.request = Some(RequestInfo::from_source(source));
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.report.environment = Some(environment.into());
        self
    }

    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.report.release = Some(release.into());
        self
    }

    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.report.server_name = Some(server_name.into());
        self
    }

    /// Fills `server_name` from the local hostname when it is not already set.
    pub fn detect_server_name(mut self) -> Self {
        if self.report.server_name.is_none()
            && let Ok(name) = hostname::get()
            && let Some(name) = name.to_str()
        {
            self.report.server_name = Some(name.to_string());
        }
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.report.timestamp = timestamp;
        self
    }

    pub fn build(self) -> Report {
        self.report
    }
}
