//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → [storage resolves the path into a link]
//!     → [proxy dispatcher picks a strategy]
//!     → headers.rs (disposition, type, ETag)
//!     → serve.rs + range.rs (conditionals, Range, 206/multipart)
//!       or response.rs (passthrough of the origin's head)
//!     → Send to client
//! ```

pub mod headers;
pub mod range;
pub mod request;
pub mod response;
pub mod serve;
pub mod server;

pub use headers::{attach_headers, etag_for, mime_type_for};
pub use request::{merge_headers, request_id, X_REQUEST_ID};
pub use serve::serve_range;
pub use server::HttpServer;
