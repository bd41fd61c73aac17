//! Tollgate Storage - on-disk state of the proxy.
//!
//! This crate handles:
//!
//! - The content-addressed response cache ([`CacheStore`])
//! - The timestamped event log ([`EventLog`])
//! - Per-client reports grepped out of that log ([`generate_report`])
//!
//! # Example
//!
//! ```no_run
//! use tollgate_storage::{generate_report, EventLog};
//!
//! let log = EventLog::open("/var/lib/tollgate/proxy.log").unwrap();
//! log.record("Connection from 10.0.0.5");
//! log.flush();
//!
//! let report = generate_report(log.path(), "10.0.0.5", "/tmp".as_ref()).unwrap();
//! println!("{}", report.display());
//! ```

pub mod cache;
pub mod error;
pub mod event_log;
pub mod report;

pub use cache::{CacheKey, CacheStore, CacheWriter};
pub use error::{Result, StorageError};
pub use event_log::{EventLog, LogSink};
pub use report::{generate_report, report_file_name};
