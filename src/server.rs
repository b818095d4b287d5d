use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OwnedSemaphorePermit;

use crate::address::Resolver;
use crate::admission::AdmissionGate;
use crate::config::ServerConfig;
use crate::deliver::Deliver;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::session::{Session, SessionContext};

/// The listening side: admits connections from approved hosts and runs one
/// session task per connection.
pub struct LmtpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    gate: AdmissionGate,
    ctx: SessionContext,
}

impl LmtpServer {
    pub async fn bind(
        config: Arc<ServerConfig>,
        deliverer: Arc<dyn Deliver>,
        resolver: Arc<dyn Resolver>,
        logger: Logger,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let settings = &config.settings;
        let gate = AdmissionGate::new(settings.soft_limit, settings.hard_limit, settings.backoff);

        logger
            .log(local_addr, &format!("Listening as {}", settings.host_name))
            .await;

        Ok(Self {
            listener,
            local_addr,
            gate,
            ctx: SessionContext {
                config,
                deliverer,
                resolver,
                logger,
            },
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions currently running.
    pub fn live_sessions(&self) -> usize {
        self.gate.live()
    }

    /// A handle on the live count that stays valid after `run` takes the server.
    pub fn gate(&self) -> AdmissionGate {
        self.gate.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) {
        loop {
            let permit = self.gate.admit().await;

            match self.listener.accept().await {
                Ok((stream, peer)) => self.handle_client(stream, peer, permit).await,
                Err(e) => {
                    self.ctx
                        .logger
                        .log(self.local_addr, &format!("Accept error: {}", e))
                        .await;
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr, permit: OwnedSemaphorePermit) {
        let logger = &self.ctx.logger;

        if !self.ctx.config.is_approved(peer.ip()) {
            // Closed without a greeting.
            drop(stream);
            logger.log(peer, "Rejected connection from unapproved host").await;
            return;
        }

        logger.log(peer, "Started service for host").await;

        let (reader, writer) = stream.into_split();
        let session = Session::new(BufReader::new(reader), writer, peer, self.ctx.clone());
        let slot = self.gate.occupy(permit);

        tokio::spawn(async move {
            let _slot = slot;
            let _ = session.run().await;
        });
    }
}
