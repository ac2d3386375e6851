//! Equality-based label selectors (`a=b,c!=d,e`), evaluated locally by the
//! in-memory client and passed through verbatim to the API server otherwise.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

/// Parsed label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Self {
        let requirements = selector
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                if let Some((key, value)) = part.split_once("!=") {
                    Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
                } else if let Some((key, value)) = part.split_once("==") {
                    Requirement::Equals(key.trim().to_string(), value.trim().to_string())
                } else if let Some((key, value)) = part.split_once('=') {
                    Requirement::Equals(key.trim().to_string(), value.trim().to_string())
                } else if let Some(key) = part.strip_prefix('!') {
                    Requirement::NotExists(key.trim().to_string())
                } else {
                    Requirement::Exists(part.to_string())
                }
            })
            .collect();
        Self { requirements }
    }

    /// Whether an object's `metadata.labels` satisfy every requirement
    pub fn matches(&self, object: &Value) -> bool {
        let labels = object.pointer("/metadata/labels");
        let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(Value::as_str);

        self.requirements.iter().all(|requirement| match requirement {
            Requirement::Equals(key, value) => label(key) == Some(value.as_str()),
            Requirement::NotEquals(key, value) => label(key) != Some(value.as_str()),
            Requirement::Exists(key) => label(key).is_some(),
            Requirement::NotExists(key) => label(key).is_none(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}
