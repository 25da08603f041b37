//! Redirectable log sink
//!
//! The host process owns stdio, so the façade can point the log at a
//! file at any time. The subscriber is installed once with a sink whose
//! target is swappable behind a mutex; `set_log_file` retargets every
//! future write without touching the subscriber.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

enum SinkTarget {
    Stderr,
    File(File),
}

/// Cloneable handle to a swappable log target
#[derive(Clone)]
pub struct LogSink {
    target: Arc<Mutex<SinkTarget>>,
}

impl LogSink {
    fn new() -> Self {
        Self {
            target: Arc::new(Mutex::new(SinkTarget::Stderr)),
        }
    }

    fn global() -> &'static LogSink {
        static SINK: OnceLock<LogSink> = OnceLock::new();
        SINK.get_or_init(LogSink::new)
    }

    /// Retarget the sink to append to `path`, creating the file if needed
    fn set_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.target.lock().unwrap() = SinkTarget::File(file);
        Ok(())
    }
}

/// Writer handed to the subscriber per event
pub struct SinkWriter {
    target: Arc<Mutex<SinkTarget>>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.target.lock().unwrap() {
            SinkTarget::Stderr => io::stderr().write(buf),
            SinkTarget::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.target.lock().unwrap() {
            SinkTarget::Stderr => io::stderr().flush(),
            SinkTarget::File(file) => file.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            target: Arc::clone(&self.target),
        }
    }
}

/// Install the global subscriber writing through the redirectable sink.
/// Safe to call repeatedly; only the first call wins.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(LogSink::global().clone())
        .try_init();
}

/// Append log output to `path` from now on, creating the file if needed
pub fn set_log_file(path: impl AsRef<Path>) -> io::Result<()> {
    LogSink::global().set_file(path)
}
