//! Proxy dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Link + FileObject (from storage)
//!     → upgrade.rs (optional: remote link → range source)
//!     → dispatcher.rs (markdown short-circuit or one of four strategies)
//!         local handle    → range server (throttled unless an OS file)
//!         range source    → throttled range server
//!         parallel remote → range server over parallel part fetches
//!         plain remote    → passthrough of the origin's response
//! ```
//!
//! # Design Decisions
//! - The link is a tagged enum; the strategy is a function of its variant
//! - Range capability is a tri-state: unresolved, disabled, resolved

pub mod dispatcher;
pub mod link;
pub mod markdown;
pub mod object;
pub mod upgrade;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use link::{Link, LocalFile, LocalLink, ParallelHints, RangeSupport, RangedLink, RemoteLink, Strategy};
pub use object::FileObject;
pub use upgrade::{maybe_upgrade, HttpRangeFactory, RangeSourceFactory};
