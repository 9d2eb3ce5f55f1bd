use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = crate::protocol::DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Lines buffered per client before a slow reader is disconnected.
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u32).range(1..))]
    pub queue_capacity: u32,

    /// Disconnect clients that send nothing for this many seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
}

impl ServeArgs {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
            queue_capacity: self.queue_capacity as usize,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name shown to other participants.
    #[arg(long)]
    pub username: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = crate::protocol::DEFAULT_SERVER_ADDR)]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["chat_relay", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        let config = args.config();
        assert_eq!(config.listen, "0.0.0.0:5555".parse::<SocketAddr>().unwrap());
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn serve_overrides() {
        let cli = Cli::try_parse_from([
            "chat_relay",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--queue-capacity",
            "8",
            "--idle-timeout-secs",
            "30",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        let config = args.config();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let result = Cli::try_parse_from(["chat_relay", "serve", "--queue-capacity", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn client_requires_username() {
        assert!(Cli::try_parse_from(["chat_relay", "client"]).is_err());
        let cli = Cli::try_parse_from(["chat_relay", "client", "--username", "alice"]).unwrap();
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.server, "127.0.0.1:5555".parse::<SocketAddr>().unwrap());
    }
}
