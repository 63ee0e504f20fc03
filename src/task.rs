use std::any::Any;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

/// Shared stop flag observed by every session task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records panics caught at task boundaries, in memory and optionally
/// appended to a file.
#[derive(Debug, Clone, Default)]
pub struct PanicLog {
    path: Option<PathBuf>,
    entries: Arc<Mutex<Vec<String>>>,
}

impl PanicLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            entries: Arc::default(),
        }
    }

    pub fn record(&self, task: &str, message: &str) {
        let line = format!("[{}] task {task} panicked: {message}", crate::time::unix_now());
        log::error!("{line}");
        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, &line) {
                // nowhere left to report to
                log::error!("failed to write panic log {}: {e}", path.display());
                std::process::abort();
            }
        }
        self.entries.lock().push(line);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Spawns a named thread whose panics are caught and logged. A panicking
/// task cancels its siblings so the session winds down.
pub fn spawn_guarded<F>(
    name: &str,
    cancel: CancelToken,
    panics: PanicLog,
    f: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let task = name.to_string();
    thread::Builder::new().name(task.clone()).spawn(move || {
        log::debug!("task {task} started");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            panics.record(&task, &panic_message(payload.as_ref()));
            cancel.cancel();
        }
        log::debug!("task {task} stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn panics_are_caught_and_recorded() {
        let cancel = CancelToken::new();
        let log = PanicLog::new(None);
        let handle = spawn_guarded("boom", cancel.clone(), log.clone(), || {
            panic!("bad frame");
        })
        .unwrap();
        handle.join().unwrap();
        assert!(cancel.is_cancelled());
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("task boom panicked: bad frame"));
    }

    #[test]
    fn panic_log_appends_to_file() {
        let path = std::env::temp_dir().join(format!("clanlord-panic-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let log = PanicLog::new(Some(path.clone()));
        log.record("udp", "one");
        log.record("tcp", "two");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
