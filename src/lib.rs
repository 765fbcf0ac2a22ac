//! Content-delivery link proxy library.
//!
//! Resolves request paths to storage links and serves the bytes behind them
//! with range negotiation, identity headers, egress throttling and optional
//! markdown rendering.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod render;
pub mod security;
pub mod storage;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{Dispatcher, DispatcherConfig, FileObject, Link};
