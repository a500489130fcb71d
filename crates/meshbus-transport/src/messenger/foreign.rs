//! One connection to a remote host.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use meshbus_core::{BoxStream, Environment, HostId, HostLiveness};
use meshbus_proto::PooledBuffer;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, trace};

use super::Inner;
use crate::{error::FrameError, io::read_frame};

/// Bytes queued for a host's writer task.
pub(super) enum Outbound {
    /// Envelope header in a pooled buffer followed by the shared body
    Mailbox { header: PooledBuffer, body: Bytes },
    /// A complete control frame
    Control(Bytes),
}

/// Handle to the tasks serving one remote host.
///
/// Sends enqueue onto an unbounded channel drained by the writer task, so a
/// send never blocks the caller. Frames to one host stay in enqueue order.
pub(super) struct ForeignHost {
    /// Distinguishes this connection from earlier ones to the same host id
    pub(super) generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    pub(super) liveness: Arc<Mutex<HostLiveness>>,
    frames_sent: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ForeignHost {
    /// Split `stream` and start its reader and writer tasks.
    pub(super) fn spawn<E: Environment>(
        inner: &Arc<Inner<E>>,
        host: HostId,
        generation: u64,
        stream: BoxStream,
    ) -> Self {
        let (read, write) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let liveness =
            Arc::new(Mutex::new(HostLiveness::new(inner.env.now(), inner.config.dead_host_timeout)));

        let reader =
            tokio::spawn(read_loop(Arc::clone(inner), host, generation, read, Arc::clone(&liveness)));
        let writer = tokio::spawn(write_loop(Arc::clone(inner), host, generation, write, queue));

        Self { generation, outbound, liveness, frames_sent: AtomicU64::new(0), reader, writer }
    }

    /// Queue a frame. Returns false once the writer has stopped.
    pub(super) fn enqueue(&self, frame: Outbound) -> bool {
        if self.outbound.send(frame).is_err() {
            return false;
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Frames queued to this host so far.
    pub(super) fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stop both tasks. Queued frames are dropped and their buffers released.
    pub(super) fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for ForeignHost {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<E: Environment>(
    inner: Arc<Inner<E>>,
    host: HostId,
    generation: u64,
    mut read: ReadHalf<BoxStream>,
    liveness: Arc<Mutex<HostLiveness>>,
) {
    loop {
        match read_frame(&mut read, inner.config.max_frame_size).await {
            Ok(Some(frame)) => {
                liveness.lock().record_inbound(inner.env.now());
                inner.dispatch(host, frame);
            },
            Ok(None) => {
                debug!(peer = host.0, "peer closed connection");
                inner.connection_lost(host, generation);
                return;
            },
            Err(FrameError::Io(err)) => {
                debug!(peer = host.0, error = %err, "read failed");
                inner.connection_lost(host, generation);
                return;
            },
            Err(FrameError::Protocol(err)) => {
                error!(peer = host.0, error = %err, "undecodable frame");
                inner.faults.crash(&format!("undecodable frame from {host}: {err}"));
                inner.connection_lost(host, generation);
                return;
            },
        }
    }
}

async fn write_loop<E: Environment>(
    inner: Arc<Inner<E>>,
    host: HostId,
    generation: u64,
    mut write: WriteHalf<BoxStream>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = queue.recv().await {
        let written = match frame {
            Outbound::Mailbox { header, body } => {
                let result = write_all(&mut write, header.as_slice(), &body).await;
                drop(header);
                result
            },
            Outbound::Control(frame) => write.write_all(&frame).await,
        };
        if let Err(err) = written {
            debug!(peer = host.0, error = %err, "write failed");
            inner.connection_lost(host, generation);
            return;
        }
        trace!(peer = host.0, "frame written");
    }
}

async fn write_all(
    write: &mut WriteHalf<BoxStream>,
    header: &[u8],
    body: &[u8],
) -> std::io::Result<()> {
    write.write_all(header).await?;
    write.write_all(body).await
}
