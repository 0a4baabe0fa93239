//! Filtered, paginated listing.
//!
//! The filter cannot be pushed into the storage query, so the engine
//! over-fetches name-ordered batches, filters in process, and assembles
//! exactly one page of matches plus a probe row that tells it whether a next
//! page exists. Batch sizes adapt to the observed selectivity so that pages
//! of a low-selectivity traversal still cost a near-constant number of scans.

mod batcher;
mod token;

pub use batcher::Batcher;
pub use token::{decode_token, encode_token, TokenError};

use crate::cancel::CancelToken;
use crate::codec;
use crate::error::ApiError;
use crate::filter::FilterProgram;
use crate::model::ResultEntry;
use crate::store::ScanScope;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Page-size policy: negative sizes are rejected, zero means "unset" and
/// falls back to the default, oversized requests clamp silently to the cap.
pub fn normalize_page_size(requested: i64) -> Result<usize, ApiError> {
    if requested < 0 {
        return Err(ApiError::invalid_argument(format!(
            "page_size must not be negative, got {requested}"
        )));
    }
    if requested == 0 {
        return Ok(DEFAULT_PAGE_SIZE);
    }
    Ok((requested as usize).min(MAX_PAGE_SIZE))
}

/// One emitted page: matches in strict ascending name order, plus the token
/// that resumes the traversal when a next page exists.
#[derive(Debug)]
pub struct Page {
    pub results: Vec<ResultEntry>,
    pub next_page_token: Option<String>,
}

/// Runs the scan loop for one list request.
///
/// `resume_name` is the decoded continuation token: the name of the first
/// candidate of this page, scanned inclusively. The cursor advances over
/// every observed row (matched or not) so a traversal never revisits rows,
/// and the cancel token is polled between batches.
pub fn list_page(
    scope: &ScanScope<'_>,
    program: &FilterProgram,
    filter_text: &str,
    page_size: usize,
    resume_name: Option<&str>,
    cancel: &CancelToken,
) -> Result<Page, ApiError> {
    let target = page_size + 1;
    let mut batcher = Batcher::new(target, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
    let mut matches: Vec<ResultEntry> = Vec::new();
    let mut cursor: Option<String> = None;

    while matches.len() < target {
        cancel.check("list_scan_batch")?;
        let batch_size = batcher.next();
        let rows = match (cursor.as_deref(), resume_name) {
            (Some(after), _) => scope.scan(after, batch_size)?,
            (None, Some(start)) => scope.scan_inclusive(start, batch_size)?,
            (None, None) => scope.scan("", batch_size)?,
        };
        let returned = rows.len();
        let mut matched = 0;
        for row in rows {
            cursor = Some(row.name);
            let entry = codec::decode_result(&row.data)?;
            if program.matches_entry(&entry)? {
                matched += 1;
                matches.push(entry);
                if matches.len() >= target {
                    break;
                }
            }
        }
        if returned < batch_size {
            // Store exhausted.
            break;
        }
        batcher.update(matched, returned);
    }

    if matches.len() >= target {
        let probe = matches.pop().unwrap_or_default();
        return Ok(Page {
            results: matches,
            next_page_token: Some(encode_token(&probe.name, filter_text)),
        });
    }
    Ok(Page {
        results: matches,
        next_page_token: None,
    })
}
