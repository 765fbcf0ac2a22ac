//! Upstream I/O subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher picks a strategy
//!     → range_reader.rs (local handle or single ranged GET)
//!     → downloader.rs (parallel ranged GETs, reassembled in order)
//!     → client.rs (shared reqwest client, timeouts, user agent)
//!     → ByteStream handed to the range server or response body
//! ```
//!
//! # Design Decisions
//! - Every source speaks the same `RangeReader` contract
//! - Streams own their resources; dropping one releases handles and sockets

pub mod client;
pub mod downloader;
pub mod range_reader;

pub use client::UpstreamClient;
pub use downloader::{Downloader, DownloadRequest, ParallelRangeReader};
pub use range_reader::{ByteStream, HttpRange, HttpRangeReader, RangeReader, SeekableRangeReader, SeekableRead};
