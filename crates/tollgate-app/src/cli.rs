//! Command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tollgate_proxy::ProxyConfig;

/// Tollgate - forward HTTP/HTTPS proxy with token login and domain filtering
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
pub struct Args {
    /// JSON config file. Other flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the cache, filter list, event log and reports
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Address the proxy listens on
    #[arg(long, global = true)]
    pub listen: Option<SocketAddr>,

    /// Origin port for plain HTTP requests without an explicit port
    #[arg(long, global = true)]
    pub forward_port: Option<u16>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the proxy until interrupted (default)
    Run {
        /// Also serve the control API on this address
        #[arg(long)]
        api: Option<SocketAddr>,
    },
    /// Manage the domain filter list
    #[command(subcommand)]
    Hosts(HostsCommand),
    /// Write every event log line mentioning an IP to a report file
    Report {
        /// Client IP address
        ip: String,
    },
    /// Print a short product description
    About,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum HostsCommand {
    /// Block requests whose host contains this text
    Add { host: String },
    /// Remove a filter entry
    Remove { host: String },
    /// List filter entries
    List,
}

impl Args {
    /// The subcommand to run, defaulting to `run` without the API.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { api: None })
    }

    /// Effective log level after `--debug`.
    pub fn log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Data directory: `--data-dir`, then the platform data dir, then `.`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(ProxyConfig::default_data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Builds the proxy config from the config file and flags.
    ///
    /// Without `--config`, every state file lives under [`data_dir`](Self::data_dir).
    /// With it, file paths come from the config unless `--data-dir` is given.
    pub fn proxy_config(&self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ProxyConfig::default().with_data_dir(self.data_dir()),
        };

        if self.config.is_some() {
            if let Some(dir) = &self.data_dir {
                config = config.with_data_dir(dir);
            }
        }
        if let Some(addr) = self.listen {
            config = config.with_listen_addr(addr);
        }
        if let Some(port) = self.forward_port {
            config = config.with_forward_port(port);
        }

        config.validate()?;
        Ok(config)
    }
}
