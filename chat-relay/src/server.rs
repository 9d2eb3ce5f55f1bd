use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    error::{ServerError, SessionError},
    protocol,
    registry::Registry,
    session::{Session, SessionHandle},
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Lines buffered per client before it is considered too slow and dropped.
    pub queue_capacity: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], protocol::DEFAULT_PORT)),
            queue_capacity: 256,
            idle_timeout: None,
        }
    }
}

/// Accepts connections and runs one session task per client.
pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::from_listener(listener, config))
    }

    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            broadcaster: Broadcaster::new(Arc::new(Registry::new())),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// Accepts clients until `shutdown` resolves or `accept` fails.
    ///
    /// Sessions that are already running keep running either way.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            broadcaster,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(clients = broadcaster.registry().len(), "relay no longer accepting clients");
                    break;
                }
                accept_result = listener.accept() => {
                    let (stream, peer) = accept_result.map_err(ServerError::Accept)?;
                    spawn_session(stream, peer, &broadcaster, &config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &Broadcaster,
    config: &ServerConfig,
) {
    let registry = broadcaster.registry();
    let (handle, outbound) =
        SessionHandle::new(registry.next_id(), Some(peer), config.queue_capacity);
    registry.add(Arc::clone(&handle));
    info!(session = %handle.id(), peer = %peer, "client connected");

    let session = Session::new(handle, stream, outbound, broadcaster.clone())
        .with_idle_timeout(config.idle_timeout);

    tokio::spawn(async move {
        match session.run().await {
            Ok(()) => debug!(peer = %peer, "client disconnected"),
            Err(SessionError::HandshakeIncomplete) => {
                debug!(peer = %peer, "client left before sending a username")
            }
            Err(err) => warn!(peer = %peer, error = ?err, "client connection closed with error"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.to_string(), protocol::DEFAULT_LISTEN_ADDR);
        assert!(config.listen.ip().is_unspecified());
        assert!(config.idle_timeout.is_none());
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            listen: taken.local_addr().unwrap(),
            ..ServerConfig::default()
        };

        match Server::bind(config).await {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken.local_addr().unwrap()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail while the port is taken"),
        }
    }
}
