use super::RequestDeadline;
use crate::cancel::CancelToken;
use crate::net::NetError;
use std::io::Write;

/// Shared metadata for handling a single HTTP request.
#[derive(Clone)]
pub(crate) struct HttpRequestContext {
    pub deadline: RequestDeadline,
    pub cancel: CancelToken,
}

impl HttpRequestContext {
    pub(crate) fn new(deadline: RequestDeadline, cancel: CancelToken) -> Self {
        Self { deadline, cancel }
    }

    pub(crate) fn check_deadline(
        &self,
        stream: &mut (impl Write + ?Sized),
        stage: &'static str,
    ) -> Result<(), HttpHandlerError> {
        let alive = self
            .deadline
            .respond_if_expired(stream)
            .map_err(|err| HttpHandlerError::request(stage, err))?;
        if alive {
            Ok(())
        } else {
            Err(HttpHandlerError::DeadlineExpired { stage })
        }
    }
}

/// Connection-level failures surfaced by HTTP request handlers.
#[derive(Debug)]
pub(crate) enum HttpHandlerError {
    DeadlineExpired {
        stage: &'static str,
    },
    Request {
        stage: &'static str,
        error: NetError,
    },
    Response {
        stage: &'static str,
        error: NetError,
    },
}

impl HttpHandlerError {
    pub(crate) fn request(stage: &'static str, error: NetError) -> Self {
        Self::Request { stage, error }
    }

    pub(crate) fn response(stage: &'static str, error: NetError) -> Self {
        Self::Response { stage, error }
    }
}
