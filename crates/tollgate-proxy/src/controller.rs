//! Control surface used by front ends (CLI, REST API).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use tollgate_core::Session;
use tollgate_storage::{generate_report, LogSink};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::server::{self, ProxyContext, ProxyHandle};

/// Starts and stops the proxy and edits its filter list.
///
/// All methods are synchronous, but [`start`](Self::start) must be called
/// from within a Tokio runtime since it spawns the accept loop.
pub struct ProxyController {
    context: Arc<ProxyContext>,
    running: Mutex<Option<ProxyHandle>>,
}

impl ProxyController {
    /// Opens the proxy's state files. Does not start listening.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Ok(Self {
            context: Arc::new(ProxyContext::open(config)?),
            running: Mutex::new(None),
        })
    }

    /// Forwards every event log line to `sink` as well.
    pub fn with_sink(self, sink: LogSink) -> Self {
        self.context.events().set_sink(Some(sink));
        self
    }

    /// Shared engine state.
    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.context
    }

    pub fn config(&self) -> &ProxyConfig {
        self.context.config()
    }

    /// Starts listening and returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock();
        if let Some(handle) = running.as_ref() {
            return Err(ProxyError::AlreadyRunning(handle.addr()));
        }
        let handle = server::start(Arc::clone(&self.context))?;
        let addr = handle.addr();
        *running = Some(handle);
        self.context.events().record("Proxy server started.");
        Ok(addr)
    }

    /// Stops accepting new connections. In-flight connections finish on
    /// their own. Returns `false` if the proxy was not running.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.running.lock().take() else {
            return false;
        };
        handle.shutdown();
        self.context.events().record("Proxy server stopped.");
        true
    }

    /// Like [`stop`](Self::stop), but waits for the accept loop to exit.
    pub async fn shutdown(&self) -> bool {
        let handle = self.running.lock().take();
        let Some(handle) = handle else {
            return false;
        };
        handle.stop().await;
        self.context.events().record("Proxy server stopped.");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Address the proxy is listening on, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(ProxyHandle::addr)
    }

    /// Logged-in client addresses, oldest login first.
    pub fn sessions(&self) -> Vec<(IpAddr, Session)> {
        self.context.gate().sessions()
    }

    /// Adds a filter entry. Returns `false` if it was already listed.
    pub fn add_host(&self, host: &str) -> Result<bool> {
        let added = self.context.filter().add(host)?;
        if added {
            self.context
                .events()
                .record(format!("Added {} to filter list.", host.trim()));
        }
        Ok(added)
    }

    /// Removes a filter entry. Returns `false` if it was not listed.
    pub fn remove_host(&self, host: &str) -> Result<bool> {
        let removed = self.context.filter().remove(host)?;
        if removed {
            self.context
                .events()
                .record(format!("Removed {} from filter list.", host.trim()));
        }
        Ok(removed)
    }

    /// Current filter entries in insertion order.
    pub fn list_hosts(&self) -> Vec<String> {
        self.context.filter().list()
    }

    /// Writes every log line mentioning `ip` to `<report_dir>/<ip>_report.txt`.
    pub fn generate_report(&self, ip: &str) -> Result<PathBuf> {
        let events = self.context.events();
        events.flush();
        match generate_report(events.path(), ip, &self.config().report_dir) {
            Ok(path) => {
                events.record(format!("Report generated for {ip}"));
                Ok(path)
            }
            Err(e) => {
                events.record(format!("Error generating report: {e}"));
                Err(e.into())
            }
        }
    }

    /// One-line product description.
    pub fn about(&self) -> String {
        about()
    }
}

impl Drop for ProxyController {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.shutdown();
        }
    }
}

/// One-line product description.
pub fn about() -> String {
    format!(
        "Tollgate {} - forward HTTP/HTTPS proxy with token login and domain filtering",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> ProxyController {
        let config = ProxyConfig::default()
            .with_data_dir(dir.path())
            .with_listen_addr("127.0.0.1:0".parse().unwrap());
        ProxyController::new(config).unwrap()
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        assert!(!controller.is_running());
        assert!(!controller.stop());

        let addr = controller.start().unwrap();
        assert!(controller.is_running());
        assert_eq!(controller.local_addr(), Some(addr));
        assert!(matches!(controller.start(), Err(ProxyError::AlreadyRunning(a)) if a == addr));

        assert!(controller.stop());
        assert!(!controller.is_running());

        controller.start().unwrap();
        assert!(controller.shutdown().await);
        assert!(!controller.shutdown().await);
    }

    #[test]
    fn hosts_persist_across_controllers() {
        let dir = TempDir::new().unwrap();
        {
            let controller = controller(&dir);
            assert!(controller.add_host("ads.example.com").unwrap());
            assert!(!controller.add_host("ads.example.com").unwrap());
            assert!(controller.add_host("tracker").unwrap());
            assert!(controller.remove_host("ads.example.com").unwrap());
            assert!(!controller.remove_host("missing").unwrap());
        }
        let controller = controller(&dir);
        assert_eq!(controller.list_hosts(), vec!["tracker"]);
    }

    #[test]
    fn report_selects_lines_for_ip() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let log_path = controller.context().events().path().to_path_buf();
        fs::write(
            &log_path,
            "a - Accepted connection from 10.0.0.5:4000\n\
             b - Accepted connection from 10.0.0.9:4001\n\
             c - Client 10.0.0.5 authenticated with filtering.\n\
             d - Blocked request to ads.com from 10.0.0.9\n\
             e - Forwarded GET example.com for 10.0.0.5: 200 (10 bytes)\n",
        )
        .unwrap();

        let path = controller.generate_report("10.0.0.5").unwrap();
        assert_eq!(path.file_name().unwrap(), "10.0.0.5_report.txt");
        let report = fs::read_to_string(path).unwrap();
        assert_eq!(
            report,
            "a - Accepted connection from 10.0.0.5:4000\n\
             c - Client 10.0.0.5 authenticated with filtering.\n\
             e - Forwarded GET example.com for 10.0.0.5: 200 (10 bytes)\n"
        );
    }

    #[test]
    fn report_rejects_addresses_that_leave_report_dir() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        controller.context().events().record("Accepted connection from 10.0.0.5:4000");

        let err = controller.generate_report("../outside").unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Storage(tollgate_storage::StorageError::InvalidReportAddress(_))
        ));
        assert!(!dir.path().join("outside_report.txt").exists());
        assert!(!controller.config().report_dir.join("../outside_report.txt").exists());
    }

    #[test]
    fn sink_sees_control_events() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: LogSink = Arc::new(move |line: &str| captured.lock().push(line.to_string()));

        let controller = controller(&dir).with_sink(sink);
        controller.add_host("example.org").unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ends_with(" - Added example.org to filter list."));
    }

    #[test]
    fn about_names_product() {
        assert!(about().starts_with("Tollgate "));
    }
}
