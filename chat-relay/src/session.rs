//! One connected client.
//!
//! A session moves through `Connected -> Named -> Closed`. The session task
//! owns the read half of the connection; a dedicated writer task owns the
//! write half and drains the bounded outbound queue, so every recipient sees
//! its messages in the order they were queued and no two writes interleave.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    error::{SendError, SessionError},
    protocol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared view of a session used by the registry and broadcaster.
///
/// Holding a handle only allows queueing lines and asking the session to
/// stop. The connection itself stays with the session's own tasks.
pub struct SessionHandle {
    id: SessionId,
    peer: Option<SocketAddr>,
    name: OnceLock<String>,
    outbound: mpsc::Sender<String>,
    closed: AtomicBool,
    shutdown: watch::Sender<Option<SendError>>,
}

impl SessionHandle {
    /// Creates a handle plus the receiving end of its outbound queue.
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, receiver) = mpsc::channel(queue_capacity.max(1));
        let (shutdown, _) = watch::channel(None);
        let handle = Arc::new(Self {
            id,
            peer,
            name: OnceLock::new(),
            outbound,
            closed: AtomicBool::new(false),
            shutdown,
        });
        (handle, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    pub fn is_named(&self) -> bool {
        self.name.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sets the display name. Only the first call has any effect.
    pub(crate) fn set_name(&self, name: String) -> bool {
        self.name.set(name).is_ok()
    }

    /// Queues `line` for delivery without waiting.
    ///
    /// A full queue means the client is not keeping up; the session is told
    /// to shut down and the line is dropped.
    pub fn send(&self, line: &str) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        match self.outbound.try_send(line.to_owned()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.request_shutdown(SendError::Lagged);
                Err(SendError::Lagged)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Asks the session's tasks to stop. The first reason recorded wins.
    pub fn request_shutdown(&self, reason: SendError) {
        self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Transitions the session to `Closed`.
    ///
    /// Removes it from the registry, stops its writer and, if it had a name,
    /// tells everyone else it left. Returns `false` when the session was
    /// already closed, in which case nothing happens.
    pub fn close(&self, broadcaster: &Broadcaster) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        broadcaster.registry().remove(self.id);
        self.request_shutdown(SendError::Closed);

        match self.name() {
            Some(name) => {
                info!(session = %self.id, peer = ?self.peer, %name, "client left");
                broadcaster.send(&protocol::left(name), Some(self.id));
            }
            None => debug!(session = %self.id, peer = ?self.peer, "unnamed session closed"),
        }
        true
    }

    fn subscribe_shutdown(&self) -> watch::Receiver<Option<SendError>> {
        self.shutdown.subscribe()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &self.name.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The task-side half of a session: the connection and the outbound queue.
pub struct Session<S> {
    handle: Arc<SessionHandle>,
    stream: S,
    outbound: mpsc::Receiver<String>,
    broadcaster: Broadcaster,
    idle_timeout: Option<Duration>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        handle: Arc<SessionHandle>,
        stream: S,
        outbound: mpsc::Receiver<String>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            handle,
            stream,
            outbound,
            broadcaster,
            idle_timeout: None,
        }
    }

    /// Closes the session if no line arrives within `limit`.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    /// Runs the session to completion.
    ///
    /// Whatever ends the read loop, the session is closed before this
    /// returns. The returned error only says why; it has already been
    /// handled.
    pub async fn run(self) -> Result<(), SessionError> {
        let Session {
            handle,
            stream,
            outbound,
            broadcaster,
            idle_timeout,
        } = self;

        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let writer_task = tokio::spawn(write_outbound(writer, outbound, Arc::clone(&handle)));

        let mut shutdown = handle.subscribe_shutdown();
        let result = read_loop(
            &handle,
            &broadcaster,
            &mut reader,
            &mut shutdown,
            idle_timeout,
        )
        .await;

        handle.close(&broadcaster);
        drop(reader);
        if let Err(err) = writer_task.await {
            warn!(session = %handle.id(), error = ?err, "writer task failed");
        }

        result
    }
}

async fn read_loop<R>(
    handle: &SessionHandle,
    broadcaster: &Broadcaster,
    reader: &mut R,
    shutdown: &mut watch::Receiver<Option<SendError>>,
    idle_timeout: Option<Duration>,
) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let name = match next_line(reader, shutdown, idle_timeout).await? {
        Some(line) if !line.is_empty() => line,
        _ => return Err(SessionError::HandshakeIncomplete),
    };

    handle.set_name(name.clone());
    info!(session = %handle.id(), peer = ?handle.peer(), %name, "client joined");
    broadcaster.send(&protocol::joined(&name), Some(handle.id()));

    while let Some(text) = next_line(reader, shutdown, idle_timeout).await? {
        debug!(session = %handle.id(), %name, %text, "received");
        broadcaster.send(&protocol::chat(&name, &text), Some(handle.id()));
    }

    Ok(())
}

async fn next_line<R>(
    reader: &mut R,
    shutdown: &mut watch::Receiver<Option<SendError>>,
    idle_timeout: Option<Duration>,
) -> Result<Option<String>, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let read = async {
        match idle_timeout {
            Some(limit) => match timeout(limit, protocol::read_line(reader)).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no line received before idle timeout",
                )),
            },
            None => protocol::read_line(reader).await,
        }
    };

    select! {
        biased;
        reason = shutdown.wait_for(Option::is_some) => {
            let reason = reason.ok().and_then(|reason| *reason).unwrap_or(SendError::Closed);
            Err(SessionError::WriteFailure(reason))
        }
        line = read => line.map_err(SessionError::ReadFailure),
    }
}

async fn write_outbound<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    handle: Arc<SessionHandle>,
) where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = handle.subscribe_shutdown();

    loop {
        let line = select! {
            biased;
            _ = shutdown.wait_for(Option::is_some) => break,
            line = outbound.recv() => line,
        };
        let Some(line) = line else {
            break;
        };

        let written = select! {
            biased;
            _ = shutdown.wait_for(Option::is_some) => break,
            written = protocol::write_line(&mut writer, &line) => written,
        };
        if let Err(err) = written {
            debug!(session = %handle.id(), error = ?err, "failed to deliver line to client");
            handle.request_shutdown(SendError::Io(err.kind()));
            break;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(session = %handle.id(), error = ?err, "failed to shut down writer cleanly");
    }
}
