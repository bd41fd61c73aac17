//! Tollgate - forward HTTP/HTTPS proxy with token login and domain filtering.
//!
//! This crate provides the `tollgate` binary's building blocks:
//!
//! - Command-line parsing and config resolution ([`cli`])
//! - Logging initialisation ([`logging`])
//!
//! # Usage
//!
//! ```ignore
//! use clap::Parser;
//! use tollgate_app::cli::Args;
//! use tollgate_proxy::ProxyController;
//!
//! let args = Args::parse();
//! let controller = ProxyController::new(args.proxy_config()?)?;
//! controller.start()?;
//! ```

pub mod cli;
pub mod logging;

pub use cli::{Args, Command, HostsCommand};
