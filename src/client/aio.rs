// Cooperative-async framed transport.
//
// Same contract as the blocking connection; suspension points are the
// socket send/receive awaits.  The socket is opened lazily on first use so
// pool construction stays synchronous.

use bson::Document;
use bytes::BytesMut;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::client::pool::PoolMember;
use crate::error::{Result, ServiceError};
use crate::wire;

pub struct AsyncConnection {
    stream: Option<TcpStream>,
    address: String,
    valid: bool,
}

impl AsyncConnection {
    pub fn new(host: &str, port: &str) -> Self {
        Self {
            stream: None,
            address: format!("{}:{}", host, port),
            valid: true,
        }
    }

    async fn socket(&mut self) -> Result<&mut TcpStream> {
        if !self.valid {
            self.stream = None;
        }
        if self.stream.is_none() {
            debug!("Opening connection to {}", self.address);
            let stream = TcpStream::connect(&self.address).await.map_err(|e| {
                ServiceError::Network(format!(
                    "Error connecting to service {}. {}",
                    self.address, e
                ))
            })?;
            if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                debug!("Unable to enable keep-alive: {}", e);
            }
            self.stream = Some(stream);
            self.valid = true;
        }
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(ServiceError::Network("connection unavailable".to_string())),
        }
    }

    pub async fn execute(&mut self, document: &Document, buf_size: usize) -> Option<Document> {
        let payload = match wire::encode(document) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding command: {}", e);
                return None;
            }
        };

        if let Err(e) = self.send(&payload).await {
            debug!("Error sending data to socket {}", e);
            self.stream = None;
            if let Err(e) = self.send(&payload).await {
                warn!("Error re-sending data to socket {}", e);
                self.valid = false;
                return None;
            }
        }

        let frame = match self.receive(buf_size).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Error reading data from socket {}", e);
                self.stream = None;
                self.valid = false;
                return None;
            }
        };

        match wire::decode(&frame) {
            Ok(response) => Some(response),
            Err(_) => {
                info!("Invalid BSON with size {} in response", frame.len());
                self.stream = None;
                self.valid = false;
                None
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let stream = self.socket().await?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, buf_size: usize) -> Result<Vec<u8>> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(ServiceError::Network("connection closed".to_string())),
        };

        let hint = buf_size.max(wire::MIN_FRAME_SIZE);
        let mut buffer = BytesMut::with_capacity(hint);
        let mut chunk = vec![0u8; hint];

        loop {
            let expected = wire::frame_size(&buffer).min(wire::MAX_FRAME_SIZE);
            if buffer.len() >= wire::MIN_FRAME_SIZE && buffer.len() >= expected {
                buffer.truncate(expected);
                return Ok(buffer.to_vec());
            }

            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(ServiceError::Network(
                    "connection closed by peer".to_string(),
                ));
            }
            buffer.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl PoolMember for AsyncConnection {
    fn is_valid(&self) -> bool {
        self.valid
    }
}
