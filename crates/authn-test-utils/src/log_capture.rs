//! In-memory log capture
//!
//! Installs a thread-local `tracing_subscriber::fmt` subscriber writing
//! into a buffer, for tests asserting on what is (and is not) logged.

use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Every crate of the client, at trace level.
pub const CLIENT_LOG_FILTER: &str = "authn=trace,authn_client=trace,common=trace";

/// Shared log buffer.
///
/// # Example
/// ```rust,ignore
/// let (logs, _guard) = CapturedLogs::install();
/// client.verify(&CallContext::new(), "tok").await.unwrap_err();
/// assert!(!logs.contents().contains("tok"));
/// ```
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Capture client logs on the current thread until the guard drops.
    ///
    /// Use with the default current-thread `#[tokio::test]` runtime.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(CLIENT_LOG_FILTER))
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer poisoned")).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
