//! HTTP/JSON front-end for the archive service.
//!
//! The front-end owns no business logic: it decodes requests, derives the
//! per-request cancel token from the deadline and the server shutdown flag,
//! dispatches into [`ArchiveService`], and maps error kinds onto wire status
//! codes.

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use url::form_urlencoded;

use super::http::{
    read_request, write_json_response, HttpHandlerError, HttpRequest, HttpRequestContext,
    RequestDeadline,
};
use super::{server, NetError};
use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::mask::FieldMask;
use crate::model::{AnyData, ResultEntry};
use crate::service::ArchiveService;

const MAX_CONCURRENT_CONNECTIONS: usize = 64;
pub(crate) const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ArchiveHttpServerConfig {
    pub bind: SocketAddr,
    pub max_connections: Option<usize>,
}

pub struct ArchiveHttpServerHandle {
    inner: server::ServerHandle,
}

impl ArchiveHttpServerHandle {
    pub fn shutdown(&mut self) {
        if let Err(err) = self.try_shutdown(Duration::from_secs(5)) {
            warn!("event=archive_http_shutdown_error error={err}");
        }
    }

    pub fn try_shutdown(&mut self, timeout: Duration) -> Result<(), NetError> {
        self.inner.try_shutdown(timeout)
    }
}

pub struct ArchiveHttpServer;

impl ArchiveHttpServer {
    pub fn spawn(
        config: ArchiveHttpServerConfig,
        service: Arc<ArchiveService>,
    ) -> Result<ArchiveHttpServerHandle, NetError> {
        info!("archive HTTP server listening on {}", config.bind);
        let listener = TcpListener::bind(config.bind)?;
        let max_connections = config.max_connections.or(Some(MAX_CONCURRENT_CONNECTIONS));
        let handler = move |mut stream: TcpStream,
                            addr: SocketAddr,
                            shutdown: Arc<AtomicBool>|
              -> Result<(), NetError> {
            configure_stream(&stream)?;
            let deadline = RequestDeadline::from_timeout(API_REQUEST_TIMEOUT);
            let cancel = CancelToken::from_flag(shutdown).with_deadline(deadline.expires_at());
            let ctx = HttpRequestContext::new(deadline, cancel);
            let request = match read_request(&mut stream) {
                Ok(request) => request,
                Err(err) => {
                    warn!("invalid archive request from {addr}: {err}");
                    write_json_response(
                        &mut stream,
                        400,
                        &serde_json::json!({ "error": "invalid HTTP request", "status": 400 }),
                    )?;
                    return Ok(());
                }
            };
            match handle_api_request(&ctx, request, service.as_ref(), &mut stream) {
                Ok(()) => Ok(()),
                Err(err) => map_api_handler_error(err),
            }
        };
        let inner = server::spawn_listener("archive_http", listener, max_connections, handler)
            .map_err(NetError::from)?;
        Ok(ArchiveHttpServerHandle { inner })
    }
}

fn configure_stream(stream: &TcpStream) -> Result<(), NetError> {
    stream.set_read_timeout(Some(API_REQUEST_TIMEOUT))?;
    stream.set_write_timeout(Some(API_REQUEST_TIMEOUT))?;
    Ok(())
}

pub(crate) fn handle_api_request(
    ctx: &HttpRequestContext,
    request: HttpRequest,
    service: &ArchiveService,
    stream: &mut (impl std::io::Write + ?Sized),
) -> Result<(), HttpHandlerError> {
    ctx.check_deadline(stream, "request_read")?;
    let result = dispatch_request(service, ctx, &request);
    ctx.check_deadline(stream, "service_dispatch")?;
    match result {
        Ok(response) => write_json_response(stream, 200, &response)
            .map_err(|err| HttpHandlerError::response("service_dispatch", err)),
        Err(err) => write_json_response(stream, err.status, &err.body)
            .map_err(|err| HttpHandlerError::response("service_dispatch", err)),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CreateResultRequest {
    #[serde(default)]
    result: ResultEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UpdateResultRequest {
    #[serde(default)]
    result: ResultEntry,
    #[serde(default)]
    update_mask: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    etag: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CreateRecordRequest {
    #[serde(default)]
    data: Option<AnyData>,
}

#[derive(Debug, Serialize)]
struct ListResultsResponse {
    results: Vec<ResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

fn dispatch_request(
    service: &ArchiveService,
    ctx: &HttpRequestContext,
    request: &HttpRequest,
) -> Result<serde_json::Value, HttpApiError> {
    let route = Route::of(request).ok_or_else(|| {
        HttpApiError::status_message(
            404,
            format!("no route for {} {}", request.method, request.path),
        )
    })?;
    let cancel = &ctx.cancel;
    match route {
        Route::CreateResult { parent } => {
            let payload: CreateResultRequest = parse_body_or_default(request)?;
            let created = service.create_result(parent, payload.result, cancel)?;
            serialize_response(created, "create_result")
        }
        Route::ListResults { parent } => {
            let params = ListParams::of(request)?;
            let page = service.list_results(
                parent,
                &params.filter,
                params.page_size,
                params.page_token.as_deref(),
                cancel,
            )?;
            serialize_response(
                ListResultsResponse {
                    results: page.results,
                    next_page_token: page.next_page_token,
                },
                "list_results",
            )
        }
        Route::GetResult { name } => {
            let entry = service.get_result(name)?;
            serialize_response(entry, "get_result")
        }
        Route::UpdateResult { name } => {
            let payload: UpdateResultRequest = parse_body(request)?;
            let mask = payload
                .update_mask
                .map(FieldMask::from_paths)
                .transpose()
                .map_err(ApiError::from)?;
            let updated = service.update_result(name, payload.result, mask, cancel)?;
            serialize_response(updated, "update_result")
        }
        Route::DeleteResult { name } => {
            let payload: DeleteRequest = parse_body_or_default(request)?;
            service.delete_result(name, &payload.etag, cancel)?;
            Ok(serde_json::json!({}))
        }
        Route::CreateRecord { result } => {
            let payload: CreateRecordRequest = parse_body_or_default(request)?;
            let record = service.create_record(result, payload.data, cancel)?;
            serialize_response(record, "create_record")
        }
        Route::GetRecord { name } => {
            let record = service.get_record(name)?;
            serialize_response(record, "get_record")
        }
        Route::DeleteRecord { name } => {
            let payload: DeleteRequest = parse_body_or_default(request)?;
            service.delete_record(name, &payload.etag, cancel)?;
            Ok(serde_json::json!({}))
        }
    }
}

/// Routes are derived from the name grammar: collection paths end in the
/// collection segment, item paths contain it.
#[derive(Debug, Clone, Copy)]
enum Route<'a> {
    CreateResult { parent: &'a str },
    ListResults { parent: &'a str },
    GetResult { name: &'a str },
    UpdateResult { name: &'a str },
    DeleteResult { name: &'a str },
    CreateRecord { result: &'a str },
    GetRecord { name: &'a str },
    DeleteRecord { name: &'a str },
}

impl<'a> Route<'a> {
    fn of(request: &'a HttpRequest) -> Option<Self> {
        let name = request.path.strip_prefix("/v1/")?;
        let method = request.method.as_str();
        if let Some(parent) = name.strip_suffix("/results") {
            return match method {
                "POST" => Some(Self::CreateResult { parent }),
                "GET" => Some(Self::ListResults { parent }),
                _ => None,
            };
        }
        if let Some(result) = name.strip_suffix("/records") {
            return match method {
                "POST" => Some(Self::CreateRecord { result }),
                _ => None,
            };
        }
        // Item routes are decided by the trailing collection marker, not by
        // substring search: a parent segment may legitimately be a literal
        // `results` or `records` value.
        match trailing_collection(name) {
            Some(crate::model::RECORDS_SEGMENT) => match method {
                "GET" => Some(Self::GetRecord { name }),
                "DELETE" => Some(Self::DeleteRecord { name }),
                _ => None,
            },
            Some(crate::model::RESULTS_SEGMENT) => match method {
                "GET" => Some(Self::GetResult { name }),
                "PATCH" => Some(Self::UpdateResult { name }),
                "DELETE" => Some(Self::DeleteResult { name }),
                _ => None,
            },
            _ => None,
        }
    }
}

/// The collection segment preceding the final id of `<prefix>/<collection>/<id>`.
fn trailing_collection(name: &str) -> Option<&str> {
    let (rest, id) = name.rsplit_once('/')?;
    if id.is_empty() {
        return None;
    }
    let (prefix, marker) = rest.rsplit_once('/')?;
    if prefix.is_empty() {
        return None;
    }
    Some(marker)
}

struct ListParams {
    filter: String,
    page_size: i64,
    page_token: Option<String>,
}

impl ListParams {
    fn of(request: &HttpRequest) -> Result<Self, HttpApiError> {
        let mut params = Self {
            filter: String::new(),
            page_size: 0,
            page_token: None,
        };
        let Some(query) = request.query.as_deref() else {
            return Ok(params);
        };
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "filter" => params.filter = value.into_owned(),
                "page_size" => {
                    params.page_size = value.parse().map_err(|_| {
                        HttpApiError::status_message(
                            400,
                            format!("page_size must be an integer, got `{value}`"),
                        )
                    })?;
                }
                "page_token" => params.page_token = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(params)
    }
}

fn serialize_response<T: Serialize>(
    value: T,
    context: &'static str,
) -> Result<serde_json::Value, HttpApiError> {
    serde_json::to_value(value)
        .map_err(|err| HttpApiError::internal(format!("failed to serialize {context}: {err}")))
}

fn parse_body<T: DeserializeOwned>(request: &HttpRequest) -> Result<T, HttpApiError> {
    if request
        .header("content-type")
        .map(|value| value.eq_ignore_ascii_case("application/json"))
        != Some(true)
    {
        return Err(HttpApiError::status_message(
            415,
            "Content-Type must be application/json",
        ));
    }
    serde_json::from_slice(&request.body)
        .map_err(|err| HttpApiError::status_message(400, format!("invalid JSON body: {err}")))
}

/// Bodiless requests (delete preconditions, empty creates) fall back to the
/// default payload.
fn parse_body_or_default<T: DeserializeOwned + Default>(
    request: &HttpRequest,
) -> Result<T, HttpApiError> {
    if request.body.is_empty() {
        return Ok(T::default());
    }
    parse_body(request)
}

pub(crate) struct HttpApiError {
    status: u16,
    body: serde_json::Value,
}

impl HttpApiError {
    fn status_message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message.into(), "status": status }),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::status_message(500, message)
    }
}

impl From<ApiError> for HttpApiError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::InvalidArgument(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::AlreadyExists(_) => 409,
            ApiError::FailedPrecondition(_) => 412,
            ApiError::Cancelled { .. } => 408,
            ApiError::Internal(_) => 500,
        };
        if status == 500 {
            warn!("event=archive_api_internal_error error={err}");
        }
        Self {
            status,
            body: serde_json::json!({
                "error": err.to_string(),
                "code": err.kind(),
                "status": status,
            }),
        }
    }
}

fn map_api_handler_error(err: HttpHandlerError) -> Result<(), NetError> {
    match err {
        HttpHandlerError::DeadlineExpired { stage } => {
            warn!("event=archive_http_deadline_expired stage={stage}");
            Ok(())
        }
        HttpHandlerError::Request { stage, error } | HttpHandlerError::Response { stage, error } => {
            warn!("event=archive_http_handler_error stage={stage} error={error}");
            Err(error)
        }
    }
}
