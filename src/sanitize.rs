//! Scrubbing of sensitive values before a report leaves the process.

use crate::domain::Report;
use serde_json::Value;
use std::collections::BTreeMap;

pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "authorization",
    "cookie",
    "api_key",
    "apikey",
    "credit_card",
];

#[cfg_attr(test, mockall::automock)]
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, report: Report) -> Report;
}

/// Masks every value whose key contains one of the configured fragments,
/// compared case-insensitively.
#[derive(Debug, Clone)]
pub struct KeyRedactor {
    fragments: Vec<String>,
}

impl Default for KeyRedactor {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS.iter().copied())
    }
}

impl KeyRedactor {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fragments.iter().any(|fragment| key.contains(fragment))
    }

    fn scrub_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, inner) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *inner = Value::String(REDACTED.to_string());
                    } else {
                        self.scrub_value(inner);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.scrub_value(item)),
            _ => {}
        }
    }

    fn scrub_strings(&self, map: &mut BTreeMap<String, String>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) {
                *value = REDACTED.to_string();
            }
        }
    }
}

impl Sanitizer for KeyRedactor {
    fn sanitize(&self, mut report: Report) -> Report {
        for (key, value) in report.context.iter_mut() {
            if self.is_sensitive(key) {
                *value = Value::String(REDACTED.to_string());
            } else {
                self.scrub_value(value);
            }
        }

        if let Some(request) = report.request.as_mut() {
            self.scrub_strings(&mut request.headers);
            self.scrub_strings(&mut request.query);
            if let Some(body) = request.body.as_mut() {
                self.scrub_value(body);
            }
        }

        report
    }
}

/// Leaves reports untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSanitizer;

impl Sanitizer for NoopSanitizer {
    fn sanitize(&self, report: Report) -> Report {
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequestInfo;
    use serde_json::json;

    #[test]
    fn masks_nested_context_values() {
        let report = Report::builder("boom")
            .context("user", json!({"name": "ann", "Password": "hunter2", "tokens": [1, 2]}))
            .context("apiKey", "abc")
            .context("items", json!([{"secret_value": "x", "ok": 1}]))
            .build();

        let clean = KeyRedactor::default().sanitize(report);
        assert_eq!(
            clean.context["user"],
            json!({"name": "ann", "Password": REDACTED, "tokens": REDACTED})
        );
        assert_eq!(clean.context["apiKey"], json!(REDACTED));
        assert_eq!(clean.context["items"], json!([{"secret_value": REDACTED, "ok": 1}]));
    }

    #[test]
    fn masks_request_headers_query_and_body() {
        let mut report = Report::builder("boom").build();
        report.request = Some(RequestInfo {
            method: "POST".to_string(),
            url: "/login".to_string(),
            headers: BTreeMap::from([
                ("Authorization".to_string(), "Bearer x".to_string()),
                ("Accept".to_string(), "*/*".to_string()),
            ]),
            query: BTreeMap::from([("access_token".to_string(), "t".to_string())]),
            body: Some(json!({"user": "ann", "password": "p"})),
            ip: None,
        });

        let clean = KeyRedactor::default().sanitize(report);
        let request = clean.request.unwrap();
        assert_eq!(request.headers["Authorization"], REDACTED);
        assert_eq!(request.headers["Accept"], "*/*");
        assert_eq!(request.query["access_token"], REDACTED);
        assert_eq!(request.body, Some(json!({"user": "ann", "password": REDACTED})));
    }

    #[test]
    fn custom_fragments_replace_defaults() {
        let redactor = KeyRedactor::new(["ssn"]);
        assert!(redactor.is_sensitive("user_SSN"));
        assert!(!redactor.is_sensitive("password"));
    }
}
