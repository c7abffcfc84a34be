//! Dedicated writer task for serialized frame sending.
//!
//! Every connection owns one writer task fed by an mpsc channel. Callers
//! never touch the socket's write half directly, so concurrent sends to
//! the same peer can never interleave header and body bytes.
//!
//! # Architecture
//!
//! ```text
//! send() caller 1 ─┐
//! send() caller 2 ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► Socket
//! close()         ─┘
//! ```
//!
//! Frames queued together are written in a batch with `write_vectored`.
//! A frame may carry a flush acknowledgment, which the task fires once the
//! batch containing it has been written and flushed.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SockwireError};
use crate::protocol::OutboundFrame;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Message from a handle to the writer task.
#[derive(Debug)]
enum WriterCommand {
    /// Write a frame, optionally acknowledging once flushed.
    Frame {
        frame: OutboundFrame,
        flushed: Option<oneshot::Sender<()>>,
    },
    /// Drain queued frames, shut down the write half and exit.
    Shutdown,
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across callers.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Returns once the frame is queued; ordering between frames queued by
    /// the same caller is preserved.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(WriterCommand::Frame {
                frame,
                flushed: None,
            })
            .await
            .map_err(|_| SockwireError::ConnectionClosed)
    }

    /// Queue a frame and wait until it has been written and flushed.
    pub async fn send_flushed(&self, frame: OutboundFrame) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Frame {
                frame,
                flushed: Some(ack_tx),
            })
            .await
            .map_err(|_| SockwireError::ConnectionClosed)?;

        // The sender is dropped without firing if the write fails.
        ack_rx.await.map_err(|_| SockwireError::ConnectionClosed)
    }

    /// Ask the writer task to flush what is queued and close the write half.
    ///
    /// A no-op if the task has already exited.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown).await;
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle can be used
/// to wait for the writer task to complete.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives commands and writes frames to the socket.
async fn writer_loop<W>(mut rx: mpsc::Receiver<WriterCommand>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(cmd) => cmd,
            // All handles dropped, clean shutdown
            None => return finish(&mut writer).await,
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut acks = Vec::new();
        let mut shutdown = false;

        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WriterCommand::Frame { frame, flushed } => {
                    batch.push(frame);
                    acks.extend(flushed);
                }
                WriterCommand::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            if batch.len() < MAX_BATCH_SIZE {
                next = rx.try_recv().ok();
            }
        }

        write_batch(&mut writer, &batch).await?;
        for ack in acks {
            let _ = ack.send(());
        }

        if shutdown {
            return finish(&mut writer).await;
        }
    }
}

async fn finish<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match writer.shutdown().await {
        Ok(()) => Ok(()),
        // Peer may already be gone; the socket is closing either way.
        Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SockwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data remaining after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for frame in batch {
        for part in frame.parts() {
            let start = offset;
            let end = offset + part.len();
            offset = end;

            if part.is_empty() || skip_bytes >= end {
                continue;
            }
            let start_in_part = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&part[start_in_part..]));
        }
    }

    slices
}
