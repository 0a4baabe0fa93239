//! Continuation tokens.
//!
//! A token is opaque to clients: url-safe base64 over the layout
//! `v1:<resume-name>:<sha256-hex(filter)>`. The digest pins the token to the
//! filter text that produced it, so a traversal whose filter changes
//! mid-flight is rejected instead of silently returning an inconsistent page.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const TOKEN_VERSION: &str = "v1";
/// Hex-encoded SHA-256 width.
const DIGEST_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("continuation token is not valid base64")]
    Encoding,
    #[error("continuation token has an unsupported layout")]
    Layout,
    #[error("continuation token was minted for a different filter")]
    FilterMismatch,
}

/// Mints a token that resumes a traversal at `resume_name` (the first
/// candidate of the next page).
pub fn encode_token(resume_name: &str, filter: &str) -> String {
    let payload = format!(
        "{TOKEN_VERSION}:{resume_name}:{}",
        filter_fingerprint(filter)
    );
    URL_SAFE_NO_PAD.encode(payload.as_bytes())
}

/// Decodes a client-supplied token and validates it against the caller's
/// current filter. Returns the resume name.
pub fn decode_token(token: &str, current_filter: &str) -> Result<String, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| TokenError::Encoding)?;
    let payload = String::from_utf8(raw).map_err(|_| TokenError::Encoding)?;

    let rest = payload
        .strip_prefix(TOKEN_VERSION)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or(TokenError::Layout)?;
    // Names may contain `:`; the digest is fixed-width at the tail.
    let (resume_name, digest) = rest.rsplit_once(':').ok_or(TokenError::Layout)?;
    if digest.len() != DIGEST_LEN || resume_name.is_empty() {
        return Err(TokenError::Layout);
    }
    if digest != filter_fingerprint(current_filter) {
        return Err(TokenError::FilterMismatch);
    }
    Ok(resume_name.to_string())
}

fn filter_fingerprint(filter: &str) -> String {
    let digest = Sha256::digest(filter.as_bytes());
    let mut out = String::with_capacity(DIGEST_LEN);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_with_the_same_filter() {
        let token = encode_token("ns/a/results/x", r#"taskrun.done == true"#);
        let resume = decode_token(&token, r#"taskrun.done == true"#).expect("decodes");
        assert_eq!(resume, "ns/a/results/x");
    }

    #[test]
    fn tokens_are_url_safe() {
        let token = encode_token("ns/a/results/x?&=", "");
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn changing_the_filter_invalidates_the_token() {
        let token = encode_token("ns/a/results/x", "taskrun.done == true");
        assert_eq!(
            decode_token(&token, "taskrun.done == false"),
            Err(TokenError::FilterMismatch)
        );
    }

    #[test]
    fn empty_filter_fingerprint_is_distinct() {
        let token = encode_token("ns/a/results/x", "");
        assert!(decode_token(&token, "").is_ok());
        assert_eq!(
            decode_token(&token, "taskrun.done == true"),
            Err(TokenError::FilterMismatch)
        );
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert_eq!(decode_token("???", ""), Err(TokenError::Encoding));
        let not_versioned = URL_SAFE_NO_PAD.encode(b"v2:name:digest");
        assert_eq!(decode_token(&not_versioned, ""), Err(TokenError::Layout));
        let short_digest = URL_SAFE_NO_PAD.encode(b"v1:name:abcd");
        assert_eq!(decode_token(&short_digest, ""), Err(TokenError::Layout));
    }

    #[test]
    fn names_containing_colons_survive() {
        let name = "kind/v:1/results/x";
        let token = encode_token(name, "f == 1");
        // Filter text itself is irrelevant to layout; only the digest must match.
        let err = decode_token(&token, "f == 2").expect_err("mismatch");
        assert_eq!(err, TokenError::FilterMismatch);
        assert_eq!(decode_token(&token, "f == 1").expect("ok"), name);
    }
}
