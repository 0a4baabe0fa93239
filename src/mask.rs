//! Field-mask merge for partial updates.
//!
//! A mask names the fields of the supplied payload that replace the stored
//! ones; everything else is kept. Paths are validated against the result
//! schema before any merge happens. Unknown paths surface as not-found (the
//! wire contract this service preserves), merge type conflicts as internal.

use serde_json::Value;
use thiserror::Error;

/// Top-level result fields a mask path may start with.
const RESULT_FIELDS: &[&str] = &[
    "name",
    "id",
    "created_time",
    "annotations",
    "etag",
    "executions",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("field `{path}` not found in result schema")]
    UnknownPath { path: String },
    #[error("mask path must not be empty")]
    EmptyPath,
    #[error("cannot merge `{path}`: {detail}")]
    TypeMismatch { path: String, detail: String },
}

/// A validated update mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn from_paths<I, S>(paths: I) -> Result<Self, MaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        for path in &paths {
            let head = path.split('.').next().unwrap_or_default();
            if head.is_empty() {
                return Err(MaskError::EmptyPath);
            }
            if !RESULT_FIELDS.contains(&head) {
                return Err(MaskError::UnknownPath { path: path.clone() });
            }
        }
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Copies each masked subtree of `supplied` into `stored`. A path absent
    /// from the supplied payload clears the stored field.
    pub fn apply(&self, stored: &mut Value, supplied: &Value) -> Result<(), MaskError> {
        for path in &self.paths {
            let components: Vec<&str> = path.split('.').collect();
            let replacement = lookup(supplied, &components, path)?;
            match replacement {
                Some(value) => set(stored, &components, value, path)?,
                None => clear(stored, &components, path)?,
            }
        }
        Ok(())
    }
}

fn lookup<'a>(
    source: &'a Value,
    components: &[&str],
    path: &str,
) -> Result<Option<Value>, MaskError> {
    let mut current = source;
    for component in components {
        match current {
            Value::Object(map) => match map.get(*component) {
                Some(next) => current = next,
                None => return Ok(None),
            },
            Value::Null => return Ok(None),
            other => {
                return Err(MaskError::TypeMismatch {
                    path: path.to_string(),
                    detail: format!("supplied `{component}` is nested under a non-object {other}"),
                })
            }
        }
    }
    Ok(Some(current.clone()))
}

fn set(target: &mut Value, components: &[&str], value: Value, path: &str) -> Result<(), MaskError> {
    let (last, parents) = components.split_last().ok_or(MaskError::EmptyPath)?;
    let mut current = target;
    for component in parents {
        let map = current
            .as_object_mut()
            .ok_or_else(|| type_mismatch(path, component))?;
        current = map
            .entry(component.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| type_mismatch(path, last))?;
    map.insert(last.to_string(), value);
    Ok(())
}

fn clear(target: &mut Value, components: &[&str], path: &str) -> Result<(), MaskError> {
    let (last, parents) = components.split_last().ok_or(MaskError::EmptyPath)?;
    let mut current = target;
    for component in parents {
        match current {
            Value::Object(map) => match map.get_mut(*component) {
                Some(next) => current = next,
                // Nothing stored under the path either; the clear is a no-op.
                None => return Ok(()),
            },
            _ => return Err(type_mismatch(path, component)),
        }
    }
    match current {
        Value::Object(map) => {
            map.remove(*last);
            Ok(())
        }
        _ => Err(type_mismatch(path, last)),
    }
}

fn type_mismatch(path: &str, component: &str) -> MaskError {
    MaskError::TypeMismatch {
        path: path.to_string(),
        detail: format!("stored `{component}` is not an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_top_level_path_is_rejected_up_front() {
        let err = FieldMask::from_paths(["results_summary"]).expect_err("unknown");
        assert!(matches!(err, MaskError::UnknownPath { .. }));
        assert!(FieldMask::from_paths(["annotations", "etag"]).is_ok());
    }

    #[test]
    fn masked_merge_replaces_only_named_fields() {
        let mask = FieldMask::from_paths(["annotations"]).expect("mask");
        let mut stored = json!({
            "name": "ns/a/results/x",
            "annotations": {"old": "1"},
            "etag": "e1",
        });
        let supplied = json!({
            "name": "something-else",
            "annotations": {"k": "v"},
        });
        mask.apply(&mut stored, &supplied).expect("merge");
        assert_eq!(stored["annotations"], json!({"k": "v"}));
        assert_eq!(stored["name"], "ns/a/results/x");
        assert_eq!(stored["etag"], "e1");
    }

    #[test]
    fn nested_paths_merge_single_keys() {
        let mask = FieldMask::from_paths(["annotations.release"]).expect("mask");
        let mut stored = json!({"annotations": {"team": "ci"}});
        let supplied = json!({"annotations": {"release": "1.2"}});
        mask.apply(&mut stored, &supplied).expect("merge");
        assert_eq!(
            stored["annotations"],
            json!({"team": "ci", "release": "1.2"})
        );
    }

    #[test]
    fn absent_supplied_field_clears_the_stored_one() {
        let mask = FieldMask::from_paths(["annotations"]).expect("mask");
        let mut stored = json!({"name": "n", "annotations": {"k": "v"}});
        mask.apply(&mut stored, &json!({})).expect("merge");
        assert!(stored.get("annotations").is_none());
    }

    #[test]
    fn merging_through_a_scalar_is_a_type_mismatch() {
        let mask = FieldMask::from_paths(["annotations.k"]).expect("mask");
        let mut stored = json!({"annotations": "not-a-map"});
        let supplied = json!({"annotations": {"k": "v"}});
        let err = mask.apply(&mut stored, &supplied).expect_err("mismatch");
        assert!(matches!(err, MaskError::TypeMismatch { .. }));
    }
}
