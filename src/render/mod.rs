//! Markdown rendering subsystem.
//!
//! # Data Flow
//! ```text
//! raw markdown bytes
//!     → markdown.rs (CommonMark → HTML)
//!     → sanitize.rs (strip scripts, unsafe attributes)
//!     → safe HTML served as text/html
//! ```
//!
//! # Design Decisions
//! - Both stages sit behind traits so the dispatcher can be built with stubs
//! - Rendering is synchronous; inputs are capped before they get here

pub mod markdown;
pub mod sanitize;

use thiserror::Error;

pub use markdown::PulldownRenderer;
pub use sanitize::AmmoniaSanitizer;

/// Errors raised while turning markdown into HTML.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The document is not valid UTF-8.
    #[error("markdown is not valid UTF-8")]
    InvalidUtf8,

    /// The document exceeds the configured size cap.
    #[error("markdown exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Converts markdown source into HTML.
pub trait Renderer: Send + Sync {
    fn render(&self, markdown: &[u8]) -> Result<String, RenderError>;
}

/// Removes unsafe markup from rendered HTML.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}
