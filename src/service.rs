//! Archive mutation and query service.
//!
//! All business logic for the RPC surface lives here: the front-end decodes
//! requests and maps errors, this service validates names, mints server-side
//! fields, enforces immutability and etag preconditions, and drives the
//! pagination engine. Cancellation is checked before every commit point;
//! cancellation after a commit is ignored because the write already happened.

use chrono::Utc;
use log::warn;
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::codec;
use crate::error::ApiError;
use crate::filter::FilterEnv;
use crate::mask::FieldMask;
use crate::model::{
    validate_parent, AnyData, Record, RecordName, ResultEntry, ResultName, RECORDS_SEGMENT,
    RESULTS_SEGMENT,
};
use crate::page::{self, Page};
use crate::store::{RecordRow, RecordStore};

pub struct ArchiveService {
    store: Arc<RecordStore>,
    env: Arc<FilterEnv>,
}

impl ArchiveService {
    pub fn new(store: Arc<RecordStore>, env: Arc<FilterEnv>) -> Self {
        Self { store, env }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Creates a result under `parent`. The server mints id, name,
    /// created_time, and etag; caller-supplied values for those fields are
    /// ignored rather than echoed.
    pub fn create_result(
        &self,
        parent: &str,
        seed: ResultEntry,
        cancel: &CancelToken,
    ) -> Result<ResultEntry, ApiError> {
        validate_parent(parent).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let id = Uuid::new_v4().to_string();
        let entry = ResultEntry {
            name: format!("{parent}/{RESULTS_SEGMENT}/{id}"),
            id: id.clone(),
            created_time: Some(Utc::now()),
            annotations: seed.annotations,
            etag: new_etag(),
            executions: seed.executions,
            extra: seed.extra,
        };
        let blob = codec::encode_result(&entry)?;
        cancel.check("create_result_commit")?;
        self.store.insert(&RecordRow {
            parent: parent.to_string(),
            result_id: String::new(),
            id,
            name: entry.name.clone(),
            data: blob,
            etag: entry.etag.clone(),
        })?;
        Ok(entry)
    }

    pub fn get_result(&self, name: &str) -> Result<ResultEntry, ApiError> {
        ResultName::parse(name).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let row = self.single_row(name)?;
        Ok(codec::decode_result(&row.data)?)
    }

    /// Updates a result, either wholesale (no mask) or by merging the masked
    /// fields of the supplied payload into the stored one. The supplied
    /// payload's non-empty etag becomes the write precondition; a successful
    /// update regenerates the etag.
    pub fn update_result(
        &self,
        name: &str,
        supplied: ResultEntry,
        mask: Option<FieldMask>,
        cancel: &CancelToken,
    ) -> Result<ResultEntry, ApiError> {
        ResultName::parse(name).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let row = self.single_row(name)?;
        let stored = codec::decode_result(&row.data)?;
        let expected_etag = supplied.etag.clone();

        let merged = match mask {
            None => supplied,
            Some(mask) => {
                let mut stored_value = serde_json::to_value(&stored)
                    .map_err(|err| ApiError::internal(format!("result not representable: {err}")))?;
                let supplied_value = serde_json::to_value(&supplied)
                    .map_err(|err| ApiError::internal(format!("payload not representable: {err}")))?;
                mask.apply(&mut stored_value, &supplied_value)?;
                serde_json::from_value(stored_value).map_err(|err| {
                    ApiError::internal(format!("masked merge produced an undecodable result: {err}"))
                })?
            }
        };

        check_immutable(&stored, &merged)?;

        let mut updated = merged;
        updated.etag = new_etag();
        let blob = codec::encode_result(&updated)?;
        cancel.check("update_result_commit")?;
        self.store
            .update_blob(name, &blob, &updated.etag, &expected_etag)?;
        Ok(updated)
    }

    /// Deletes a result and, atomically with it, every child record.
    pub fn delete_result(
        &self,
        name: &str,
        expected_etag: &str,
        cancel: &CancelToken,
    ) -> Result<(), ApiError> {
        ResultName::parse(name).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let row = self.single_row(name)?;
        cancel.check("delete_result_commit")?;
        let affected = self
            .store
            .delete_result_cascade(name, &row.id, expected_etag)?;
        if affected == 0 {
            return Err(ApiError::not_found(format!("no result named `{name}`")));
        }
        Ok(())
    }

    /// Filtered, paginated listing over the whole archive in name order.
    pub fn list_results(
        &self,
        parent: &str,
        filter: &str,
        page_size: i64,
        page_token: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Page, ApiError> {
        if !parent.is_empty() {
            validate_parent(parent).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        }
        let page_size = page::normalize_page_size(page_size)?;
        let resume = match page_token {
            Some(token) if !token.is_empty() => Some(page::decode_token(token, filter)?),
            _ => None,
        };
        let program = self.env.compile(filter)?;
        let scope = self.store.list_scope();
        page::list_page(
            &scope,
            &program,
            filter,
            page_size,
            resume.as_deref(),
            cancel,
        )
    }

    /// Creates a child record under an existing result.
    pub fn create_record(
        &self,
        result_name: &str,
        data: Option<AnyData>,
        cancel: &CancelToken,
    ) -> Result<Record, ApiError> {
        let parsed = ResultName::parse(result_name)
            .map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let parent_row = self.single_row(result_name)?;
        let id = Uuid::new_v4().to_string();
        let record = Record {
            name: format!("{result_name}/{RECORDS_SEGMENT}/{id}"),
            id: id.clone(),
            data,
            etag: new_etag(),
            extra: Default::default(),
        };
        let blob = codec::encode_record(&record)?;
        cancel.check("create_record_commit")?;
        self.store.insert(&RecordRow {
            parent: parsed.parent,
            result_id: parent_row.id,
            id,
            name: record.name.clone(),
            data: blob,
            etag: record.etag.clone(),
        })?;
        Ok(record)
    }

    pub fn get_record(&self, name: &str) -> Result<Record, ApiError> {
        RecordName::parse(name).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        let row = self.single_row(name)?;
        Ok(codec::decode_record(&row.data)?)
    }

    pub fn delete_record(
        &self,
        name: &str,
        expected_etag: &str,
        cancel: &CancelToken,
    ) -> Result<(), ApiError> {
        RecordName::parse(name).map_err(|err| ApiError::invalid_argument(err.to_string()))?;
        cancel.check("delete_record_commit")?;
        let affected = self.store.delete_by_name(name, expected_etag)?;
        if affected == 0 {
            return Err(ApiError::not_found(format!("no record named `{name}`")));
        }
        Ok(())
    }

    /// One row by name. Uniqueness is a schema invariant; seeing more than
    /// one row is logged and the first is served.
    fn single_row(&self, name: &str) -> Result<RecordRow, ApiError> {
        let rows = self.store.find_by_name(name)?;
        if rows.len() > 1 {
            warn!(
                "event=duplicate_rows name={name} count={} action=serving_first",
                rows.len()
            );
        }
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found(format!("no record named `{name}`")))
    }
}

fn check_immutable(stored: &ResultEntry, merged: &ResultEntry) -> Result<(), ApiError> {
    if merged.name != stored.name {
        return Err(ApiError::invalid_argument("result name cannot be changed"));
    }
    if merged.id != stored.id {
        return Err(ApiError::invalid_argument("result id cannot be changed"));
    }
    if merged.created_time != stored.created_time {
        return Err(ApiError::invalid_argument("created time cannot be changed"));
    }
    Ok(())
}

fn new_etag() -> String {
    Uuid::new_v4().to_string()
}
