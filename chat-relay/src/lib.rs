//! Line-oriented TCP chat relay.
//!
//! Every client sends a username as its first line; every line after that is
//! relayed to all other connected clients as `"<name>: <text>"`. Joins and
//! departures are announced the same way.
//!
//! - [`server`] binds the listener and spawns one session task per client.
//! - [`session`] runs a client's handshake and read loop and owns its
//!   outbound queue and writer task.
//! - [`registry`] is the shared set of live sessions.
//! - [`broadcast`] fans a line out to every registered session but one.
//! - [`protocol`] holds the line framing and the server's message formats.
//! - [`client`] connects to a relay, for the terminal client and for tests.
//! - [`cli`] parses the command line for both modes.
//! - [`error`] lists the failure kinds of each layer.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
