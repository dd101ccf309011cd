//! Spoken confirmation of accepted attendance events.
//!
//! Rendering is delegated to a [`NotificationSink`]. The [`Announcer`] puts
//! a bounded queue and a single worker thread in front of it so the
//! capture loop never waits on audio, and sink failures and dropped
//! announcements are counted instead of vanishing.

use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}

/// Renders a name, e.g. as speech. Called only from the announcer worker.
pub trait NotificationSink: Send + Sync {
    fn announce(&self, name: &str) -> Result<(), NotifyError>;
}

/// Sink that only logs.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn announce(&self, name: &str) -> Result<(), NotifyError> {
        tracing::info!(name, "announce");
        Ok(())
    }
}

/// Sink that runs an external text-to-speech program with the name as its
/// last argument (e.g. `espeak-ng -s 150`).
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line. `None` if blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl NotificationSink for CommandSink {
    fn announce(&self, name: &str) -> Result<(), NotifyError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(name)
            .status()
            .map_err(|source| NotifyError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Whether an announcement made it onto the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// Queue full or worker gone; the announcement was discarded.
    Dropped,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of announcer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnouncerStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded queue with one worker thread feeding a [`NotificationSink`].
pub struct Announcer {
    tx: Option<mpsc::Sender<String>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Announcer {
    /// Spawn the worker. `capacity` is clamped to at least one slot.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = std::thread::Builder::new()
            .name("rollcall-announcer".into())
            .spawn(move || {
                tracing::debug!("announcer worker started");
                while let Some(name) = rx.blocking_recv() {
                    match sink.announce(&name) {
                        Ok(()) => {
                            worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(name, error = %err, "announcement failed");
                        }
                    }
                }
                tracing::debug!("announcer worker exiting");
            })
            .expect("failed to spawn announcer thread");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            counters,
        }
    }

    /// Queue `name` for announcement without blocking.
    pub fn announce(&self, name: &str) -> Dispatch {
        let sent = self
            .tx
            .as_ref()
            .map(|tx| tx.try_send(name.to_string()).is_ok())
            .unwrap_or(false);

        if sent {
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
            Dispatch::Queued
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(name, "announcement queue full; dropping");
            Dispatch::Dropped
        }
    }

    pub fn stats(&self) -> AnnouncerStats {
        AnnouncerStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue, wait for queued announcements to finish, and return
    /// the final counters.
    pub fn shutdown(mut self) -> AnnouncerStats {
        self.close();
        self.stats()
    }

    fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("announcer worker panicked");
            }
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        names: Mutex<Vec<String>>,
    }

    impl NotificationSink for RecordingSink {
        fn announce(&self, name: &str) -> Result<(), NotifyError> {
            self.names.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn announce(&self, _name: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Failed {
                program: "tts".into(),
                status: "exit status: 1".into(),
            })
        }
    }

    /// Blocks inside `announce` until released.
    struct GateSink {
        started: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl NotificationSink for GateSink {
        fn announce(&self, _name: &str) -> Result<(), NotifyError> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(())
        }
    }

    #[test]
    fn test_delivers_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let announcer = Announcer::spawn(sink.clone(), 8);
        assert_eq!(announcer.announce("Alice"), Dispatch::Queued);
        assert_eq!(announcer.announce("Bob"), Dispatch::Queued);

        let stats = announcer.shutdown();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.queued, 2);
        assert_eq!(*sink.names.lock().unwrap(), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_failures_are_absorbed_and_counted() {
        let announcer = Announcer::spawn(Arc::new(FailingSink), 4);
        announcer.announce("Alice");
        announcer.announce("Bob");
        let stats = announcer.shutdown();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_full_queue_drops() {
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let sink = Arc::new(GateSink {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let announcer = Announcer::spawn(sink, 1);

        assert_eq!(announcer.announce("first"), Dispatch::Queued);
        // worker is now inside the sink, holding "first"
        started_rx.recv().unwrap();
        assert_eq!(announcer.announce("second"), Dispatch::Queued);
        assert_eq!(announcer.announce("third"), Dispatch::Dropped);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let stats = announcer.shutdown();
        assert_eq!(
            stats,
            AnnouncerStats {
                queued: 2,
                delivered: 2,
                failed: 0,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_command_sink_parsing_and_failure() {
        assert!(CommandSink::from_command_line("   ").is_none());
        let sink = CommandSink::from_command_line("espeak-ng -s 150").unwrap();
        assert_eq!(sink.program, "espeak-ng");
        assert_eq!(sink.args, vec!["-s", "150"]);

        let missing = CommandSink::new("/nonexistent/rollcall-tts", Vec::new());
        assert!(matches!(missing.announce("Alice"), Err(NotifyError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_sink_exit_status() {
        assert!(CommandSink::new("true", Vec::new()).announce("Alice").is_ok());
        assert!(matches!(
            CommandSink::new("false", Vec::new()).announce("Alice"),
            Err(NotifyError::Failed { .. })
        ));
    }
}
