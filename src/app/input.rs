//! NDJSON report lines read by the sidecar.

use crate::domain::{Report, RequestInfo, Severity, StackSummary};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One stdin line. Only `message` is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingReport {
    pub message: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub stack: Option<StackSummary>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub request: Option<RequestInfo>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Values stamped on reports that leave them out.
#[derive(Debug, Clone, Default)]
pub struct ReportDefaults {
    pub environment: Option<String>,
    pub release: Option<String>,
}

impl IncomingReport {
    pub fn into_report(self, defaults: &ReportDefaults) -> Report {
        let mut builder = Report::builder(self.message);

        if let Some(error_type) = self.error_type {
            builder = builder.error_type(error_type);
        }
        if let Some(severity) = self.severity {
            builder = builder.severity(severity);
        }
        if let Some(stack) = self.stack {
            builder = builder.stack(stack);
        }
        for (key, value) in self.context {
            builder = builder.context(key, value);
        }
        if let Some(request) = &self.request {
            builder = builder.request(request);
        }
        if let Some(environment) = self.environment.or_else(|| defaults.environment.clone()) {
            builder = builder.environment(environment);
        }
        if let Some(release) = self.release.or_else(|| defaults.release.clone()) {
            builder = builder.release(release);
        }
        builder = match self.server_name {
            Some(server_name) => builder.server_name(server_name),
            None => builder.detect_server_name(),
        };
        if let Some(timestamp) = self.timestamp {
            builder = builder.timestamp(timestamp);
        }

        builder.build()
    }
}

/// `Ok(None)` for blank lines.
pub fn parse_report_line(
    line: &str,
    defaults: &ReportDefaults,
) -> Result<Option<Report>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let incoming: IncomingReport = serde_json::from_str(line)?;
    Ok(Some(incoming.into_report(defaults)))
}
