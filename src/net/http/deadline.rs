use super::response::write_timeout_response;
use crate::net::{HttpError, NetError};
use std::time::{Duration, Instant};

/// Absolute expiration for a single HTTP request.
///
/// Handlers short-circuit expensive work against it and the cancel token
/// handed to the service derives from the same instant, so the in-process
/// engines observe the same deadline the connection does.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RequestDeadline {
    expires_at: Instant,
}

impl RequestDeadline {
    pub(crate) fn from_timeout(timeout: Duration) -> Self {
        let bounded = if timeout.is_zero() {
            Duration::from_millis(1)
        } else {
            timeout
        };
        Self {
            expires_at: Instant::now() + bounded,
        }
    }

    pub(crate) fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub(crate) fn enforce(&self) -> Result<(), NetError> {
        if self.is_expired() {
            Err(NetError::from(HttpError::RequestTimeout))
        } else {
            Ok(())
        }
    }

    /// Writes the timeout response when expired; returns whether the request
    /// is still alive.
    pub(crate) fn respond_if_expired(
        &self,
        stream: &mut (impl std::io::Write + ?Sized),
    ) -> Result<bool, NetError> {
        if self.enforce().is_err() {
            write_timeout_response(stream)?;
            return Ok(false);
        }
        Ok(true)
    }
}
