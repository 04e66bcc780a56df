//! Response composer
//!
//! Builds outbound headers for the three delivery paths from file and grant
//! metadata. The disposition rules deliberately differ between the
//! full-file and range paths, and only Firefox gets the extended
//! `filename*` form.

use crate::config::StreamingSettings;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use blockserve_core::catalog::Operation;
use blockserve_core::range::ByteRange;
use chrono::Utc;

const OCTET_STREAM: &str = "application/octet-stream";

static MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("doc", "application/vnd.ms-word"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("mp3", "audio/mp3"),
    ("mpeg", "video/mpeg"),
    ("mp4", "video/mp4"),
    ("jpg", "image/jpeg"),
    ("JPG", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("JPEG", "image/jpeg"),
    ("png", "image/png"),
    ("PNG", "image/png"),
    ("gif", "image/gif"),
    ("GIF", "image/gif"),
    ("svg", "image/svg+xml"),
    ("SVG", "image/svg+xml"),
];

/// Look up the MIME type for a filename's suffix
pub fn mime_type(filename: &str) -> Option<&'static str> {
    let (_, suffix) = filename.rsplit_once('.')?;
    MIME_TYPES
        .iter()
        .find(|(ext, _)| *ext == suffix)
        .map(|(_, mime)| *mime)
}

/// `Content-Type` value for a filename
pub fn content_type_for(filename: &str) -> String {
    match mime_type(filename) {
        Some(mime) if mime.starts_with("text/") => format!("{}; charset=gbk", mime),
        Some(mime) => mime.to_string(),
        None => OCTET_STREAM.to_string(),
    }
}

pub fn is_firefox(user_agent: Option<&str>) -> bool {
    user_agent
        .map(|ua| ua.to_ascii_lowercase().contains("firefox"))
        .unwrap_or(false)
}

fn extended(kind: &str, name: &str) -> String {
    format!("{};filename*=\"utf-8' '{}\"", kind, name)
}

fn plain(kind: &str, name: &str) -> String {
    format!("{};filename=\"{}\"", kind, name)
}

fn by_agent(kind: &str, name: &str, firefox: bool) -> String {
    if firefox {
        extended(kind, name)
    } else {
        plain(kind, name)
    }
}

/// Disposition for whole-file delivery. Downloads always use the extended
/// form.
pub fn file_disposition(operation: Operation, filename: &str, firefox: bool) -> String {
    match operation {
        Operation::Download | Operation::DownloadLink => extended("attachment", filename),
        _ => by_agent("inline", filename, firefox),
    }
}

/// Disposition for range delivery. Only a plain `download` is an
/// attachment here.
pub fn range_disposition(operation: Operation, filename: &str, firefox: bool) -> String {
    match operation {
        Operation::Download => by_agent("attachment", filename, firefox),
        _ => by_agent("inline", filename, firefox),
    }
}

pub fn block_disposition(block_id: &str, firefox: bool) -> String {
    by_agent("attachment", block_id, firefox)
}

pub fn archive_disposition(archive_name: &str) -> String {
    plain("attachment", &format!("{}.zip", archive_name))
}

/// Whether the request carries a conditional-fetch header. No date
/// comparison is made; any value counts.
pub fn has_cached_copy(headers: &HeaderMap) -> bool {
    headers.contains_key(header::IF_MODIFIED_SINCE)
}

pub fn not_modified() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    response
}

pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Header value from arbitrary text. Filenames are passed through as raw
/// bytes, so non-ASCII names go out unencoded; control characters are
/// dropped.
fn value(text: &str) -> HeaderValue {
    let bytes: Vec<u8> = text
        .bytes()
        .filter(|b| *b == b'\t' || (*b >= 0x20 && *b != 0x7f))
        .collect();
    HeaderValue::from_bytes(&bytes).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Header builder configured from the streaming settings
#[derive(Debug, Clone)]
pub struct Composer {
    content_security_policy: String,
    cache_max_age_secs: u64,
}

impl Composer {
    pub fn new(settings: &StreamingSettings) -> Self {
        Self {
            content_security_policy: settings.content_security_policy.clone(),
            cache_max_age_secs: settings.cache_max_age_secs,
        }
    }

    fn insert(headers: &mut HeaderMap, name: HeaderName, text: &str) {
        headers.insert(name, value(text));
    }

    fn caching(&self, headers: &mut HeaderMap) {
        Self::insert(headers, header::LAST_MODIFIED, &http_date_now());
        Self::insert(
            headers,
            header::CACHE_CONTROL,
            &format!("max-age={}", self.cache_max_age_secs),
        );
    }

    fn content_headers(&self, headers: &mut HeaderMap, filename: &str) {
        Self::insert(
            headers,
            header::CONTENT_SECURITY_POLICY,
            &self.content_security_policy,
        );
        let content_type = content_type_for(filename);
        if mime_type(filename) != Some("image/jpg") {
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
        }
        Self::insert(headers, header::CONTENT_TYPE, &content_type);
    }

    /// Headers for a 200 whole-file response
    pub fn file_headers(
        &self,
        filename: &str,
        operation: Operation,
        file_size: u64,
        user_agent: Option<&str>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.caching(&mut headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        self.content_headers(&mut headers, filename);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
        Self::insert(
            &mut headers,
            header::CONTENT_DISPOSITION,
            &file_disposition(operation, filename, is_firefox(user_agent)),
        );
        headers
    }

    /// Headers for a 206 partial response
    pub fn range_headers(
        &self,
        filename: &str,
        operation: Operation,
        range: ByteRange,
        file_size: u64,
        user_agent: Option<&str>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.caching(&mut headers);
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        self.content_headers(&mut headers, filename);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
        Self::insert(
            &mut headers,
            header::CONTENT_RANGE,
            &range.content_range(file_size),
        );
        Self::insert(
            &mut headers,
            header::CONTENT_DISPOSITION,
            &range_disposition(operation, filename, is_firefox(user_agent)),
        );
        headers
    }

    /// Headers for a raw block response
    pub fn block_headers(&self, block_id: &str, size: u64, user_agent: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.caching(&mut headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        Self::insert(
            &mut headers,
            header::CONTENT_DISPOSITION,
            &block_disposition(block_id, is_firefox(user_agent)),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        headers
    }

    /// Headers for an archive response
    pub fn archive_headers(&self, archive_name: &str, size: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.caching(&mut headers);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/zip"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        Self::insert(
            &mut headers,
            header::CONTENT_DISPOSITION,
            &archive_disposition(archive_name),
        );
        headers
    }
}
