// Framed TCP listener.
//
// Each connection is a request/response loop over length-prefixed BSON:
// read one frame, validate the envelope, dispatch to the orchestrator,
// write the response frame.  A frame declaring more than the ceiling is
// answered with an error and the connection closed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServiceError};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::{storage, ServiceContext};
use crate::wire;

/// Ceiling on simultaneously served connections.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 10_000;

pub struct Server {
    ctx: Arc<ServiceContext>,
    listener: TcpListener,
    active: Arc<AtomicUsize>,
}

impl Server {
    pub async fn bind(ctx: Arc<ServiceContext>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self {
            ctx,
            listener,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ServiceError::Network(e.to_string()))
    }

    pub async fn run(self) -> Result<()> {
        info!("shadowdb service listening on {}", self.local_addr()?);

        loop {
            let (socket, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| ServiceError::Network(e.to_string()))?;

            let current = self.active.load(Ordering::Relaxed);
            if current >= MAX_CONCURRENT_CONNECTIONS {
                warn!(
                    "Connection limit reached ({}/{}), rejecting connection from {}",
                    current, MAX_CONCURRENT_CONNECTIONS, peer
                );
                continue;
            }

            debug!("New connection from {}", peer);
            self.active.fetch_add(1, Ordering::Relaxed);
            let ctx = Arc::clone(&self.ctx);
            let active = Arc::clone(&self.active);
            tokio::spawn(async move {
                if let Err(e) = handle(ctx, socket).await {
                    error!("Error handling connection from {}: {}", peer, e);
                }
                active.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

async fn handle(ctx: Arc<ServiceContext>, mut socket: TcpStream) -> Result<()> {
    loop {
        let mut prefix = [0u8; 4];
        match socket.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(ServiceError::Network(e.to_string())),
        }

        let declared = u32::from_le_bytes(prefix) as usize;
        if declared < wire::MIN_FRAME_SIZE || declared > wire::MAX_FRAME_SIZE {
            warn!("Rejecting frame with declared size {}", declared);
            respond(&mut socket, &errors::with_message("Invalid frame")).await?;
            return Ok(());
        }

        let mut frame = vec![0u8; declared];
        frame[..4].copy_from_slice(&prefix);
        socket
            .read_exact(&mut frame[4..])
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let response = match wire::decode(&frame) {
            Ok(command) => {
                let envelope = Envelope::new(command);
                if envelope.valid() {
                    storage::process(&ctx, &envelope).await
                } else {
                    warn!("Invalid request document {}", envelope.json());
                    errors::with_message("Invalid request document")
                }
            }
            Err(e) => {
                warn!("Unparseable frame: {}", e);
                errors::with_message("Invalid BSON payload")
            }
        };

        respond(&mut socket, &response).await?;
    }
}

async fn respond(socket: &mut TcpStream, response: &bson::Document) -> Result<()> {
    let payload = wire::encode(response)?;
    socket
        .write_all(&payload)
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))?;
    socket
        .flush()
        .await
        .map_err(|e| ServiceError::Network(e.to_string()))?;
    Ok(())
}
