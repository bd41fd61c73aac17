//! Append-only event log.
//!
//! Every proxy event becomes one line in a text file, prefixed with a local
//! timestamp. The line is also emitted through `tracing` and handed to an
//! optional sink so a front end can show it live.
//!
//! File writes happen on a dedicated writer thread, so [`EventLog::record`]
//! never blocks an async worker on disk I/O. Lines reach the file in the
//! order they were recorded; [`EventLog::flush`] waits until every line
//! recorded so far is on disk.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::Result;

/// Timestamp format of each line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Receiver for recorded lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

enum WriterMessage {
    Line(String),
    Flush(Sender<()>),
}

/// Handle to the event log file.
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<Option<Sender<WriterMessage>>>,
    worker: Option<JoinHandle<()>>,
    sink: RwLock<Option<LogSink>>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("path", &self.path)
            .field("has_sink", &self.sink.read().is_some())
            .finish()
    }
}

impl EventLog {
    /// Opens `path` for appending, creating it and its parent directory,
    /// and starts the writer thread.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::channel();
        let worker_path = path.clone();
        let worker = thread::Builder::new()
            .name("tollgate-event-log".into())
            .spawn(move || write_lines(worker_path, file, rx))?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(tx)),
            worker: Some(worker),
            sink: RwLock::new(None),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Installs (or clears) the sink.
    pub fn set_sink(&self, sink: Option<LogSink>) {
        *self.sink.write() = sink;
    }

    /// Queues a timestamped line for the file and returns it.
    ///
    /// A failed file write is reported through `tracing` only; the sink
    /// still receives the line.
    pub fn record(&self, message: impl AsRef<str>) -> String {
        let line = format!(
            "{} - {}",
            Local::now().format(TIMESTAMP_FORMAT),
            message.as_ref()
        );

        self.send(WriterMessage::Line(line.clone()));
        info!(target: "tollgate::events", "{}", message.as_ref());

        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(&line);
        }
        line
    }

    /// Blocks until every line recorded so far has been written.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.send(WriterMessage::Flush(ack_tx)) {
            let _ = ack_rx.recv();
        }
    }

    fn send(&self, message: WriterMessage) -> bool {
        let writer = self.writer.lock();
        let sent = writer
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok());
        if !sent {
            warn!("Event log writer for {} is gone", self.path.display());
        }
        sent
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit.
        self.writer.get_mut().take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn write_lines(path: PathBuf, mut file: File, rx: Receiver<WriterMessage>) {
    for message in rx {
        match message {
            WriterMessage::Line(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to append to {}: {}", path.display(), e);
                }
            }
            WriterMessage::Flush(ack) => {
                if let Err(e) = file.flush() {
                    warn!("Failed to flush {}: {}", path.display(), e);
                }
                let _ = ack.send(());
            }
        }
    }
}
