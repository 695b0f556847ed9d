//! Controller Handle - starts the line source feeding the mapping engine
//!
//! The source is either the serial collector on a blocking thread or a replay of
//! a captured serial log. Both deliver `Connected`, then lines. A lost port ends
//! with `Disconnected`, the end of a replay with `Finished` so that a button
//! cycle still open at the end of the capture resolves.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::line_decoder::RawLine;
pub use super::serial_collector::{
    list_ports, run_collector, CollectorError, CollectorSettings, PortCandidate, SourceEvent,
};

/// Default delay between replayed lines, the firmware's reporting rate
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur while starting or running a line source
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Error from the serial collector
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    /// The replay file could not be read
    #[error("Cannot read replay file {path}: {reason}")]
    ReplayError { path: PathBuf, reason: String },

    /// The engine side of the channel is gone
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The source task panicked or was aborted
    #[error("Task error: {0}")]
    TaskError(String),
}

/// Where lines come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Serial(CollectorSettings),
    Replay { path: PathBuf, interval: Duration },
}

/// Handle for the running line source
pub struct ControllerHandle {
    task_handle: Option<JoinHandle<Result<(), ControllerError>>>,
    shutdown: CancellationToken,
}

impl ControllerHandle {
    /// Spawns the line source; events go to `sender` until `shutdown` is cancelled
    pub async fn spawn(
        source: SourceKind,
        sender: mpsc::Sender<SourceEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self, ControllerError> {
        let token = shutdown.clone();
        let task_handle = match source {
            SourceKind::Serial(settings) => {
                info!("Starting serial source");
                tokio::task::spawn_blocking(move || {
                    run_collector(settings, sender, token).map_err(ControllerError::from)
                })
            }
            SourceKind::Replay { path, interval } => {
                let lines = read_replay_file(&path).await?;
                info!("Replaying {} lines from {}", lines.len(), path.display());
                tokio::spawn(replay(path, lines, interval, sender, token))
            }
        };

        debug!("Line source spawned");
        Ok(Self {
            task_handle: Some(task_handle),
            shutdown,
        })
    }

    /// Cancels the source and waits for it to stop
    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        self.shutdown.cancel();
        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Line source task failed: {}", e);
                    Err(ControllerError::TaskError(e.to_string()))
                }
            },
            None => Ok(()),
        }
    }
}

async fn read_replay_file(path: &Path) -> Result<Vec<String>, ControllerError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| ControllerError::ReplayError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}

async fn replay(
    path: PathBuf,
    lines: Vec<String>,
    interval: Duration,
    sender: mpsc::Sender<SourceEvent>,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    let send = |event: SourceEvent| {
        let sender = sender.clone();
        async move {
            sender
                .send(event)
                .await
                .map_err(|e| ControllerError::ChannelError(e.to_string()))
        }
    };

    send(SourceEvent::Connected(format!("replay:{}", path.display()))).await?;

    let mut ticker = tokio::time::interval(interval);
    for line in lines {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Replay cancelled");
                break;
            }
            _ = ticker.tick() => {
                send(SourceEvent::Line(RawLine::new(line))).await?;
            }
        }
    }

    send(SourceEvent::Finished("end of replay".to_string())).await?;
    info!("Replay of {} finished", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn replay_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("joykeys-{}-{}.log", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn replay_emits_connected_lines_and_finished() {
        let path = replay_file("replay", "Joystick Up\nE Button Clicked\n");
        let (tx, mut rx) = mpsc::channel(16);
        let mut handle = ControllerHandle::spawn(
            SourceKind::Replay {
                path: path.clone(),
                interval: Duration::from_millis(1),
            },
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(rx.recv().await, Some(SourceEvent::Connected(_))));
        match rx.recv().await {
            Some(SourceEvent::Line(line)) => assert_eq!(line.text, "Joystick Up"),
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await {
            Some(SourceEvent::Line(line)) => assert_eq!(line.text, "E Button Clicked"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(SourceEvent::Finished(_))));

        handle.shutdown().await.unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_replay_file_is_reported() {
        let result = read_replay_file(Path::new("/nonexistent/joykeys/replay.log")).await;
        assert!(matches!(result, Err(ControllerError::ReplayError { .. })));
    }
}
