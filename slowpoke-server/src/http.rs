//! Minimal HTTP/1.0 static file serving over an [`Endpoint`].
//!
//! One request per connection. Every byte of the response goes out through
//! [`Endpoint::send_all`], so whatever behavior is installed on the
//! connection shapes the response.

use slowpoke_core::Endpoint;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on the request line plus headers.
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 200
    Ok,
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
}

impl Status {
    /// Numeric status code.
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
        }
    }

    /// Reason phrase.
    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
        }
    }
}

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request target as sent, query string included.
    pub target: String,
}

/// Parse the request line out of a request head.
///
/// # Errors
///
/// Returns the status to answer with: [`Status::BadRequest`] for a malformed
/// request line, [`Status::MethodNotAllowed`] for anything but GET and HEAD.
pub fn parse_request(head: &[u8]) -> Result<Request, Status> {
    let head = std::str::from_utf8(head).map_err(|_| Status::BadRequest)?;
    let line = head.lines().next().ok_or(Status::BadRequest)?;

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Status::BadRequest);
    };
    if !version.starts_with("HTTP/") || !target.starts_with('/') {
        return Err(Status::BadRequest);
    }

    let method = match method {
        "GET" => Method::Get,
        "HEAD" => Method::Head,
        _ => return Err(Status::MethodNotAllowed),
    };
    Ok(Request {
        method,
        target: target.to_string(),
    })
}

/// Map a request target onto a file path under `root`.
///
/// Returns `None` for targets that cannot be decoded or that try to leave
/// `root`.
pub fn resolve_path(root: &Path, target: &str) -> Option<PathBuf> {
    let path = target.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode(path)?;

    let mut resolved = root.to_path_buf();
    for segment in decoded.split('/') {
        if segment.contains('\0') || segment.contains('\\') {
            return None;
        }
        match Path::new(segment).components().next() {
            None | Some(Component::CurDir) => {}
            Some(Component::Normal(part)) => resolved.push(part),
            Some(_) => return None,
        }
    }
    Some(resolved)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

enum Head {
    Complete(Vec<u8>),
    Empty,
    Malformed,
}

fn read_head(conn: &mut dyn Endpoint) -> io::Result<Head> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            head.truncate(end);
            return Ok(Head::Complete(head));
        }
        if head.len() >= MAX_REQUEST_HEAD {
            return Ok(Head::Malformed);
        }

        let n = conn.recv(&mut buf)?;
        if n == 0 {
            return Ok(if head.is_empty() {
                Head::Empty
            } else {
                Head::Malformed
            });
        }
        head.extend_from_slice(&buf[..n]);
    }
}

fn respond(
    conn: &mut dyn Endpoint,
    status: Status,
    content_type: &str,
    body: &[u8],
    include_body: bool,
) -> io::Result<Status> {
    let header = format!(
        "HTTP/1.0 {} {}\r\nServer: slowpoke/{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.code(),
        status.reason(),
        env!("CARGO_PKG_VERSION"),
        content_type,
        body.len()
    );
    conn.send_all(header.as_bytes())?;
    if include_body && !body.is_empty() {
        conn.send_all(body)?;
    }
    Ok(status)
}

fn respond_error(conn: &mut dyn Endpoint, status: Status, include_body: bool) -> io::Result<Status> {
    let body = format!("{} {}\n", status.code(), status.reason());
    respond(
        conn,
        status,
        "text/plain; charset=utf-8",
        body.as_bytes(),
        include_body,
    )
}

/// Read one request from `conn` and answer it with a file from `root`.
///
/// Returns `Ok(None)` if the client closed the connection without sending
/// anything, otherwise the status that was sent.
///
/// # Errors
///
/// Returns any error from receiving or sending on `conn`.
pub fn serve_connection(conn: &mut dyn Endpoint, root: &Path) -> io::Result<Option<Status>> {
    let head = match read_head(conn)? {
        Head::Complete(head) => head,
        Head::Empty => return Ok(None),
        Head::Malformed => return respond_error(conn, Status::BadRequest, true).map(Some),
    };
    let request = match parse_request(&head) {
        Ok(request) => request,
        Err(status) => return respond_error(conn, status, true).map(Some),
    };
    let include_body = request.method == Method::Get;

    let Some(mut path) = resolve_path(root, &request.target) else {
        return respond_error(conn, Status::NotFound, include_body).map(Some);
    };
    if path.is_dir() {
        path.push("index.html");
    }

    match fs::read(&path) {
        Ok(body) => {
            tracing::debug!("{:?} {} -> {}", request.method, request.target, path.display());
            respond(conn, Status::Ok, content_type(&path), &body, include_body).map(Some)
        }
        Err(e) => {
            tracing::debug!("{:?} {} -> not found ({})", request.method, request.target, e);
            respond_error(conn, Status::NotFound, include_body).map(Some)
        }
    }
}
