//! Identity and disposition headers for served objects.
//!
//! # Responsibilities
//! - Synthesize a stable ETag for an object
//! - Attach Content-Disposition, Content-Type and ETag before serving
//!
//! # Design Decisions
//! - Hash digests give strong validators; mtime/size is the fallback
//! - The maximal digest is chosen so map iteration order never matters
//! - Content-Disposition carries both a literal and an RFC 5987 filename

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, ETAG};
use axum::http::{HeaderMap, HeaderValue};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::proxy::FileObject;

/// RFC 5987 `attr-char` minus the alphanumerics, which are never escaped.
const FILENAME_STAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Compute the ETag for an object, including the surrounding quotes.
pub fn etag_for(file: &FileObject) -> String {
    if let Some(digest) = file.hashes.values().max() {
        if !digest.is_empty() {
            return format!("\"{}\"", digest);
        }
    }
    let secs = file.mod_time_unix();
    let mtime = if secs < 0 {
        format!("-{:x}", secs.unsigned_abs())
    } else {
        format!("{:x}", secs)
    };
    format!("\"{}-{:x}\"", mtime, file.size)
}

/// MIME type for a file name, `application/octet-stream` when unknown.
pub fn mime_type_for(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().to_string()
}

/// `attachment; filename="..."; filename*=UTF-8''...`
pub fn content_disposition(name: &str) -> HeaderValue {
    let encoded = utf8_percent_encode(name, FILENAME_STAR).to_string();
    let literal = name.replace('\\', "\\\\").replace('"', "\\\"");
    let full = format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", literal, encoded);
    HeaderValue::from_bytes(full.as_bytes()).unwrap_or_else(|_| {
        // Control characters in the name: keep only the encoded variant.
        HeaderValue::from_str(&format!("attachment; filename*=UTF-8''{}", encoded))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
    })
}

/// Attach disposition, type and identity headers for `file`.
pub fn attach_headers(headers: &mut HeaderMap, file: &FileObject) {
    headers.insert(CONTENT_DISPOSITION, content_disposition(&file.name));
    if let Ok(value) = HeaderValue::from_str(&mime_type_for(&file.name)) {
        headers.insert(CONTENT_TYPE, value);
    }
    match HeaderValue::from_str(&etag_for(file)) {
        Ok(value) => {
            headers.insert(ETAG, value);
        }
        Err(_) => tracing::warn!(file = %file.name, "Digest is not a valid header value, ETag omitted"),
    }
}
