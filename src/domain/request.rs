use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The narrow view of an HTTP request that web-framework adapters must provide.
pub trait RequestSource {
    fn method(&self) -> &str;
    fn url(&self) -> &str;
    fn headers(&self) -> BTreeMap<String, String>;
    fn query(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
    fn body(&self) -> Option<Value> {
        None
    }
    fn ip(&self) -> Option<String> {
        None
    }
}

/// Request context captured into a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl RequestInfo {
    pub fn from_source(source: &dyn RequestSource) -> Self {
        Self {
            method: source.method().to_uppercase(),
            url: source.url().to_string(),
            headers: source.headers(),
            query: source.query(),
            body: source.body(),
            ip: source.ip(),
        }
    }
}

impl RequestSource for RequestInfo {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> BTreeMap<String, String> {
        self.headers.clone()
    }

    fn query(&self) -> BTreeMap<String, String> {
        self.query.clone()
    }

    fn body(&self) -> Option<Value> {
        self.body.clone()
    }

    fn ip(&self) -> Option<String> {
        self.ip.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRequest;

    impl RequestSource for FakeRequest {
        fn method(&self) -> &str {
            "post"
        }

        fn url(&self) -> &str {
            "/api/orders"
        }

        fn headers(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("content-type".to_string(), "application/json".to_string())])
        }

        fn ip(&self) -> Option<String> {
            Some("10.0.0.1".to_string())
        }
    }

    #[test]
    fn captures_request_through_interface() {
        let info = RequestInfo::from_source(&FakeRequest);
        assert_eq!(info.method, "POST");
        assert_eq!(info.url, "/api/orders");
        assert_eq!(info.headers.len(), 1);
        assert!(info.query.is_empty());
        assert!(info.body.is_none());
        assert_eq!(info.ip.as_deref(), Some("10.0.0.1"));
    }
}
