use crate::net::{HttpError, NetError};
use httparse::Status;
use std::io::{self, Read};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// One buffered HTTP/1.1 request.
///
/// Only ASCII header names and an eagerly-read, `Content-Length`-framed body
/// are supported; chunked transfer encoding is rejected by omission.
#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Parses a blocking HTTP/1.1 request from the stream, capping header and
/// body sizes to avoid unbounded buffering.
pub(crate) fn read_request(stream: &mut impl Read) -> Result<HttpRequest, NetError> {
    let (buffer, header_len) = read_until_headers_end(stream)?;

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(&buffer) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return Err(NetError::from(HttpError::PartialRequest)),
        Err(err) => return Err(NetError::from(HttpError::RequestParse(err))),
    }
    let method = request.method.ok_or(HttpError::MissingMethod)?.to_string();
    let raw_path = request.path.ok_or(HttpError::MissingPath)?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (raw_path, None),
    };

    let mut header_pairs = Vec::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let value = String::from_utf8(header.value.to_vec()).map_err(|_| {
            HttpError::InvalidHeaderValue {
                name: header.name.to_string(),
            }
        })?;
        header_pairs.push((header.name.to_string(), value));
    }

    let content_length = content_length_of(&header_pairs)?;
    if content_length > MAX_BODY_BYTES {
        return Err(NetError::from(HttpError::BodyTooLarge));
    }
    let body = read_body(stream, &buffer[header_len..], content_length)?;

    Ok(HttpRequest {
        method,
        path: path.to_string(),
        query,
        headers: header_pairs,
        body,
    })
}

fn read_until_headers_end(stream: &mut impl Read) -> Result<(Vec<u8>, usize), NetError> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 1024];
    loop {
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            return Ok((buffer, pos + 4));
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(NetError::from(HttpError::HeadersTooLarge));
        }
        let read = stream.read(&mut temp).map_err(map_read_error)?;
        if read == 0 {
            return Err(NetError::from(HttpError::ConnectionClosedBeforeHeaders));
        }
        buffer.extend_from_slice(&temp[..read]);
    }
}

fn content_length_of(headers: &[(String, String)]) -> Result<usize, NetError> {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse()
                .map_err(|_| NetError::from(HttpError::InvalidContentLengthValue));
        }
    }
    Ok(0)
}

fn read_body(
    stream: &mut impl Read,
    already_buffered: &[u8],
    content_length: usize,
) -> Result<Vec<u8>, NetError> {
    let mut body = Vec::with_capacity(content_length);
    body.extend_from_slice(&already_buffered[..already_buffered.len().min(content_length)]);
    let mut temp = [0u8; 1024];
    while body.len() < content_length {
        let read = stream.read(&mut temp).map_err(map_read_error)?;
        if read == 0 {
            return Err(NetError::from(HttpError::ConnectionClosedBeforeBody));
        }
        let remaining = content_length - body.len();
        body.extend_from_slice(&temp[..read.min(remaining)]);
    }
    Ok(body)
}

fn map_read_error(err: io::Error) -> NetError {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ) {
        NetError::from(HttpError::RequestTimeout)
    } else {
        NetError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> Result<HttpRequest, NetError> {
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        read_request(&mut cursor)
    }

    #[test]
    fn parses_request_with_query_and_body() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"POST /v1/ns/default/results?x=1 HTTP/1.1\r\n");
        raw.extend_from_slice(b"Content-Type: application/json\r\n");
        raw.extend_from_slice(b"Content-Length: 2\r\n\r\n{}");
        let request = parse(&raw).expect("parses");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/v1/ns/default/results");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, b"{}");
    }

    #[test]
    fn missing_content_length_means_empty_body() {
        let request = parse(b"GET /v1/ns/a/results HTTP/1.1\r\n\r\n").expect("parses");
        assert!(request.body.is_empty());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            parse(raw),
            Err(NetError::Http(HttpError::ConnectionClosedBeforeBody))
        ));
    }

    #[test]
    fn closed_stream_before_headers_is_an_error() {
        assert!(matches!(
            parse(b"GET /x HTTP/1.1\r\n"),
            Err(NetError::Http(HttpError::ConnectionClosedBeforeHeaders))
        ));
    }
}
