use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::codec::base64_bytes;

pub(crate) const RESULTS_SEGMENT: &str = "results";
pub(crate) const RECORDS_SEGMENT: &str = "records";

/// Typed execution payload: a self-describing type tag plus opaque bytes.
///
/// The archive never interprets `value` itself; only the filter layer decodes
/// it to build evaluation bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyData {
    #[serde(default)]
    pub type_url: String,
    #[serde(default, with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl AnyData {
    pub fn new(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Trailing path component of the type URL, lowercased.
    ///
    /// `type.example.dev/pipeline.v1.TaskRun` and plain `TaskRun` both yield
    /// `taskrun`, which is how execution payloads map onto filter bindings.
    pub fn kind(&self) -> String {
        let tail = self
            .type_url
            .rsplit(['/', '.'])
            .next()
            .unwrap_or(self.type_url.as_str());
        tail.to_ascii_lowercase()
    }
}

/// A named, parented grouping of annotations and execution payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub etag: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executions: Vec<AnyData>,
    /// Fields this build does not know about, preserved across re-encode.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A child of exactly one [`ResultEntry`] holding one opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AnyData>,
    #[serde(default)]
    pub etag: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,
    #[error("parent path `{0}` must contain {{kind, value}} segment pairs")]
    UnpairedParent(String),
    #[error("name `{0}` contains an empty segment")]
    EmptySegment(String),
    #[error("`{name}` is not a valid {collection} name")]
    WrongCollection {
        name: String,
        collection: &'static str,
    },
}

/// Validates a parent path: a slash-separated sequence of
/// `{segment-kind, segment-value}` pairs, each non-empty.
pub fn validate_parent(parent: &str) -> Result<(), NameError> {
    if parent.is_empty() {
        return Err(NameError::Empty);
    }
    let segments: Vec<&str> = parent.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(NameError::EmptySegment(parent.to_string()));
    }
    if segments.len() % 2 != 0 {
        return Err(NameError::UnpairedParent(parent.to_string()));
    }
    Ok(())
}

/// Parsed form of `parent-path/results/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultName {
    pub parent: String,
    pub id: String,
}

impl ResultName {
    pub fn new(parent: &str, id: &str) -> Self {
        Self {
            parent: parent.to_string(),
            id: id.to_string(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, NameError> {
        let (parent, id) = split_collection(name, RESULTS_SEGMENT)?;
        validate_parent(parent)?;
        Ok(Self::new(parent, id))
    }
}

impl fmt::Display for ResultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.parent, RESULTS_SEGMENT, self.id)
    }
}

/// Parsed form of `parent-path/results/<rid>/records/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordName {
    pub result: ResultName,
    pub id: String,
}

impl RecordName {
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let (result_name, id) = split_collection(name, RECORDS_SEGMENT)?;
        let result = ResultName::parse(result_name)?;
        Ok(Self {
            result,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.result, RECORDS_SEGMENT, self.id)
    }
}

/// Splits `<prefix>/<collection>/<id>` into `(prefix, id)`.
fn split_collection<'a>(
    name: &'a str,
    collection: &'static str,
) -> Result<(&'a str, &'a str), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    let wrong = || NameError::WrongCollection {
        name: name.to_string(),
        collection,
    };
    let (rest, id) = name.rsplit_once('/').ok_or_else(wrong)?;
    let (prefix, marker) = rest.rsplit_once('/').ok_or_else(wrong)?;
    if marker != collection || id.is_empty() || prefix.is_empty() {
        return Err(wrong());
    }
    Ok((prefix, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_grammar_requires_segment_pairs() {
        assert!(validate_parent("namespace/default").is_ok());
        assert!(validate_parent("cluster/east/namespace/default").is_ok());
        assert_eq!(validate_parent(""), Err(NameError::Empty));
        assert!(matches!(
            validate_parent("namespace"),
            Err(NameError::UnpairedParent(_))
        ));
        assert!(matches!(
            validate_parent("namespace//default"),
            Err(NameError::EmptySegment(_))
        ));
    }

    #[test]
    fn result_name_round_trips() {
        let parsed = ResultName::parse("namespace/default/results/abc-123").expect("parses");
        assert_eq!(parsed.parent, "namespace/default");
        assert_eq!(parsed.id, "abc-123");
        assert_eq!(parsed.to_string(), "namespace/default/results/abc-123");
    }

    #[test]
    fn result_name_rejects_malformed_inputs() {
        for name in [
            "",
            "namespace/default",
            "namespace/default/results/",
            "namespace/default/record/abc",
            "results/abc",
        ] {
            assert!(ResultName::parse(name).is_err(), "accepted `{name}`");
        }
    }

    #[test]
    fn result_name_with_literal_results_segment_value() {
        let parsed = ResultName::parse("kind/results/results/xyz").expect("parses");
        assert_eq!(parsed.parent, "kind/results");
        assert_eq!(parsed.id, "xyz");
    }

    #[test]
    fn record_name_extends_its_result() {
        let parsed =
            RecordName::parse("namespace/default/results/abc/records/log-1").expect("parses");
        assert_eq!(parsed.result.parent, "namespace/default");
        assert_eq!(parsed.result.id, "abc");
        assert_eq!(parsed.id, "log-1");
        assert!(parsed
            .to_string()
            .starts_with(&parsed.result.to_string()));
    }

    #[test]
    fn any_data_kind_normalises_type_urls() {
        assert_eq!(
            AnyData::new("type.example.dev/pipeline.v1.TaskRun", vec![]).kind(),
            "taskrun"
        );
        assert_eq!(AnyData::new("PipelineRun", vec![]).kind(), "pipelinerun");
        assert_eq!(AnyData::default().kind(), "");
    }
}
