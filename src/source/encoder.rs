//! Encoder subprocess plumbing
//!
//! The external encoder (ffmpeg) is treated as an untrusted byte producer:
//! its stdout is an Annex-B H.264 stream consumed through the incremental
//! NAL splitter, its stderr is relayed line by line to the log. The child
//! is killed and reaped on close so no zombies survive a source switch.

use std::process::Stdio;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::media::nal::NalSplitter;

/// NAL units buffered between the reader task and the producer tick
pub(crate) const NAL_CHANNEL_CAPACITY: usize = 256;

/// Stdout read chunk size
const READ_CHUNK: usize = 8192;

/// A running encoder subprocess with its reader attached
pub struct EncoderProcess {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
    token: CancellationToken,
}

impl EncoderProcess {
    /// Spawn `ffmpeg` with `args` and wire stdout into `nal_tx`.
    ///
    /// `pipe_stdin` keeps stdin open for callers that feed raw frames.
    pub fn spawn(
        name: &str,
        args: &[String],
        nal_tx: mpsc::Sender<Bytes>,
        pipe_stdin: bool,
    ) -> Result<Self, SourceError> {
        let mut command = Command::new("ffmpeg");
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SourceError::EncoderSpawn)?;

        let stdout = child.stdout.take().ok_or(SourceError::EncoderExited)?;
        let stdin = child.stdin.take();
        let token = CancellationToken::new();

        let stderr_task = child.stderr.take().map(|stderr| {
            let name = name.to_string();
            let stop = token.child_token();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                tracing::debug!(encoder = %name, "{}", line);
                            }
                            _ => break,
                        },
                    }
                }
            })
        });

        let reader = {
            let name = name.to_string();
            let stop = token.child_token();
            tokio::spawn(async move {
                read_nal_stream(stdout, nal_tx, &name, stop).await;
            })
        };

        tracing::info!(encoder = %name, "Encoder process started");

        Ok(Self {
            name: name.to_string(),
            child,
            stdin,
            reader,
            stderr_task,
            token,
        })
    }

    /// Write one raw frame to the encoder's stdin
    pub async fn write_frame(&mut self, data: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdin not piped",
            )),
        }
    }

    /// Kill the child and wait for it; idempotent via consumption
    pub async fn shutdown(mut self) {
        self.token.cancel();
        self.stdin.take();

        if let Err(e) = self.child.start_kill() {
            tracing::debug!(encoder = %self.name, error = %e, "Encoder already gone");
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!(encoder = %self.name, error = %e, "Failed to reap encoder");
        }

        self.reader.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        tracing::info!(encoder = %self.name, "Encoder process stopped");
    }
}

/// Read an Annex-B byte stream and forward complete NAL bodies.
///
/// Exits on EOF, read error or cancellation; dropping `nal_tx` is how the
/// consumer learns the stream is over. A full channel drops the incoming
/// unit rather than stalling the pipe.
async fn read_nal_stream(
    mut stdout: tokio::process::ChildStdout,
    nal_tx: mpsc::Sender<Bytes>,
    name: &str,
    stop: CancellationToken,
) {
    let mut splitter = NalSplitter::new();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut dropped: u64 = 0;

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = stop.cancelled() => break,
            read = stdout.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::warn!(encoder = %name, "Encoder stream ended (EOF)");
                break;
            }
            Ok(_) => {
                splitter.push(&buf);
                while let Some(unit) = splitter.next_unit() {
                    match nal_tx.try_send(unit) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            dropped += 1;
                            if dropped % 64 == 1 {
                                tracing::warn!(
                                    encoder = %name,
                                    dropped = dropped,
                                    "NAL queue full, dropping units"
                                );
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
            Err(e) => {
                tracing::error!(encoder = %name, error = %e, "Encoder read failed");
                break;
            }
        }
    }
}

/// Drain up to `max` buffered NAL units without blocking.
///
/// `Err(EncoderExited)` once the reader has gone away and the channel is
/// empty.
pub(crate) fn drain_channel(
    rx: &mut mpsc::Receiver<Bytes>,
    max: usize,
) -> Result<Vec<Bytes>, SourceError> {
    let mut units = Vec::new();

    while units.len() < max {
        match rx.try_recv() {
            Ok(unit) => units.push(unit),
            Err(mpsc::error::TryRecvError::Empty) => return Ok(units),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if units.is_empty() {
                    return Err(SourceError::EncoderExited);
                }
                return Ok(units);
            }
        }
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_channel_respects_max() {
        let (tx, mut rx) = mpsc::channel(8);
        for i in 0..5u8 {
            tx.send(Bytes::from(vec![0x41, i])).await.unwrap();
        }

        let units = drain_channel(&mut rx, 3).unwrap();
        assert_eq!(units.len(), 3);

        let units = drain_channel(&mut rx, 16).unwrap();
        assert_eq!(units.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_channel_empty_is_ok() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        let units = drain_channel(&mut rx, 4).unwrap();
        assert!(units.is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_drain_channel_disconnected_is_error() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        drop(tx);

        assert!(matches!(
            drain_channel(&mut rx, 4),
            Err(SourceError::EncoderExited)
        ));
    }

    #[tokio::test]
    async fn test_drain_channel_flushes_before_reporting_exit() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(&[0x41, 0x00])).await.unwrap();
        drop(tx);

        // Buffered unit first, exit error on the next call.
        assert_eq!(drain_channel(&mut rx, 4).unwrap().len(), 1);
        assert!(drain_channel(&mut rx, 4).is_err());
    }
}
