use std::{io, net::SocketAddr};

use thiserror::Error;

/// Listener-level failures. Either one stops the relay.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection")]
    Accept(#[source] io::Error),
}

/// Why a single session ended. Never leaves the session task.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed before a username was received")]
    HandshakeIncomplete,
    #[error("failed to read from client")]
    ReadFailure(#[source] io::Error),
    #[error("failed to deliver to client")]
    WriteFailure(#[source] SendError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("session is closed")]
    Closed,
    #[error("outbound queue is full")]
    Lagged,
    #[error("socket write failed: {0}")]
    Io(io::ErrorKind),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to chat server")]
    Connect(#[source] io::Error),
    #[error("connection error")]
    Io(#[from] io::Error),
    #[error("username cannot be empty")]
    EmptyUsername,
}
