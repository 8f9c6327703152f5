// Blocking framed transport.
//
// Owns a single TCP socket to the service.  A send that fails is retried
// exactly once across a close-and-reconnect; receive or validation failures
// mark the connection invalid so the pool destroys it on release, and the
// next send over a surviving instance reopens the socket.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use bson::Document;
use bytes::BytesMut;
use socket2::SockRef;
use tracing::{debug, info, warn};

use crate::client::apm::Apm;
use crate::client::pool::PoolMember;
use crate::error::{Result, ServiceError};
use crate::wire;

pub struct Connection {
    stream: Option<TcpStream>,
    endpoints: Vec<SocketAddr>,
    host: String,
    port: String,
    valid: bool,
}

impl Connection {
    /// Resolve and connect eagerly.  Resolution or connect failure here is
    /// fatal for the caller; only established connections enter the pool.
    pub fn connect(host: &str, port: &str) -> Result<Self> {
        let endpoints: Vec<SocketAddr> = format!("{}:{}", host, port)
            .to_socket_addrs()
            .map_err(|e| {
                ServiceError::Network(format!(
                    "Error resolving service {}:{}. {}",
                    host, port, e
                ))
            })?
            .collect();
        if endpoints.is_empty() {
            return Err(ServiceError::Network(format!(
                "No endpoints for service {}:{}",
                host, port
            )));
        }

        let stream = Self::open(&endpoints, host, port)?;
        Ok(Self {
            stream: Some(stream),
            endpoints,
            host: host.to_string(),
            port: port.to_string(),
            valid: true,
        })
    }

    fn open(endpoints: &[SocketAddr], host: &str, port: &str) -> Result<TcpStream> {
        let mut last: Option<std::io::Error> = None;
        for endpoint in endpoints {
            match TcpStream::connect(endpoint) {
                Ok(stream) => {
                    if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
                        debug!("Unable to enable keep-alive: {}", e);
                    }
                    return Ok(stream);
                }
                Err(e) => last = Some(e),
            }
        }
        Err(ServiceError::Network(format!(
            "Error connecting to service {}:{}. {}",
            host,
            port,
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Socket self-check before a send: a closed socket is reopened, an
    /// invalidated one is closed and reopened.  A fresh socket clears the
    /// invalid flag.
    fn socket(&mut self) -> Result<&mut TcpStream> {
        if !self.valid {
            self.stream = None;
        }
        if self.stream.is_none() {
            debug!("Re-opening closed connection");
            let stream = Self::open(&self.endpoints, &self.host, &self.port)?;
            self.stream = Some(stream);
            self.valid = true;
        }
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(ServiceError::Network("connection unavailable".to_string())),
        }
    }

    /// Execute one framed request/response exchange.  `None` means the
    /// command produced no usable response; the connection is left invalid.
    pub fn execute(&mut self, document: &Document, buf_size: usize) -> Option<Document> {
        let payload = match wire::encode(document) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding command: {}", e);
                return None;
            }
        };

        if let Err(e) = self.send(&payload) {
            debug!("Error sending data to socket {}", e);
            self.stream = None;
            if let Err(e) = self.send(&payload) {
                warn!("Error re-sending data to socket {}", e);
                self.valid = false;
                return None;
            }
        }

        let frame = match self.receive(buf_size) {
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

    /// As `execute`, annotating the send and receive steps on the record.
    pub fn execute_traced(
        &mut self,
        document: &Document,
        apm: &mut dyn Apm,
        buf_size: usize,
    ) -> Option<Document> {
        let payload = match wire::encode(document) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding command: {}", e);
                return None;
            }
        };

        let send_span = apm.begin("send data", file!(), line!());
        if let Err(e) = self.send(&payload) {
            debug!("Error sending data to socket {}", e);
            self.stream = None;
            if let Err(e) = self.send(&payload) {
                warn!("Error re-sending data to socket {}", e);
                apm.error(send_span, "Send failed");
                apm.end(send_span);
                self.valid = false;
                return None;
            }
        }
        apm.end(send_span);

        let read_span = apm.begin("read response", file!(), line!());
        let frame = match self.receive(buf_size) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Error reading data from socket {}", e);
                apm.error(read_span, "Receive failed");
                apm.end(read_span);
                self.stream = None;
                self.valid = false;
                return None;
            }
        };
        apm.end(read_span);

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

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let stream = self.socket()?;
        stream.write_all(payload)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, buf_size: usize) -> Result<Vec<u8>> {
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

            let read = stream.read(&mut chunk)?;
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

impl PoolMember for Connection {
    fn is_valid(&self) -> bool {
        self.valid
    }
}
