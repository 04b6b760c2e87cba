//! Kettle socket lifecycle: connect with retries, keep-alive, send and receive.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use super::cipher::KettleCipher;
use super::discovery;
use super::transport::{Received, encode_envelope, open_envelope, read_envelope, write_envelope};
use super::types::MSG_KEEP_CONNECT;
use crate::config::{AppConfig, DiscoveryConfig};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// TCP session with one kettle.
pub struct KettleConnection {
    stream: Option<TcpStream>,
    state: ConnectionState,
    addr: String,
    timeout_duration: Duration,
    connect_attempts: u32,
    max_frame_bytes: usize,
    cipher: KettleCipher,
    discovery: DiscoveryConfig,
}

impl KettleConnection {
    /// Create a disconnected session for `addr` ("host:port").
    pub fn new(addr: impl Into<String>, timeout_duration: Duration, cipher: KettleCipher) -> Self {
        let defaults = AppConfig::default();
        Self {
            stream: None,
            state: ConnectionState::Disconnected,
            addr: addr.into(),
            timeout_duration,
            connect_attempts: defaults.device.connect_attempts,
            max_frame_bytes: defaults.device.max_frame_bytes,
            cipher,
            discovery: defaults.discovery,
        }
    }

    /// Create a session from the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let key = config.cipher.key_bytes().map_err(|e| AppError::config(e.to_string()))?;
        let iv = config.cipher.iv_bytes().map_err(|e| AppError::config(e.to_string()))?;

        Ok(Self::new(config.device.address(), config.device.timeout(), KettleCipher::new(&key, &iv))
            .with_connect_attempts(config.device.connect_attempts)
            .with_max_frame_bytes(config.device.max_frame_bytes)
            .with_discovery(config.discovery.clone()))
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Connect to the kettle, retrying up to the configured number of attempts.
    ///
    /// Each failed attempt runs a discovery probe first to coax the kettle awake.
    /// Running out of attempts leaves the session disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        info!("Attempting to connect to kettle at {}", self.addr);
        self.state = ConnectionState::Connecting;
        let mut remaining = self.connect_attempts;

        while remaining > 0 {
            match self.try_connect().await {
                Ok(()) => {
                    info!("Connected to kettle at {}", self.addr);
                    return Ok(());
                }
                Err(e) => {
                    remaining -= 1;
                    warn!("Socket error: {e} | {remaining} attempts remaining");
                    self.stream = None;
                    if self.discovery.probe_on_connect_failure {
                        self.wake_probe().await;
                    }
                }
            }
        }

        error!("Could not connect to {} after {} attempts", self.addr, self.connect_attempts);
        self.state = ConnectionState::Disconnected;
        Err(AppError::ConnectionFailed {
            host: self.addr.clone(),
            attempts: self.connect_attempts,
        })
    }

    async fn try_connect(&mut self) -> Result<()> {
        let stream = timeout(self.timeout_duration, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| AppError::Timeout(format!("Connection timeout to {}", self.addr)))??;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;

        // Liveness check before handing the session out.
        self.keep_connect().await
    }

    async fn wake_probe(&self) {
        match discovery::probe(&self.discovery).await {
            Ok(Some(found)) => debug!("Probe answered by {}", found.address),
            Ok(None) => {}
            Err(e) => debug!("Discovery probe failed: {e}"),
        }
    }

    /// Send the literal KeepConnect frame.
    pub async fn keep_connect(&mut self) -> Result<()> {
        trace!("A: KeepConnect");
        self.write(MSG_KEEP_CONNECT).await
    }

    /// Send `content` wrapped in an envelope, encrypted when asked.
    pub async fn send(&mut self, content: &[u8], encrypt: bool) -> Result<()> {
        let envelope = encode_envelope(content, encrypt, &self.cipher);
        self.write(&envelope).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let timeout_duration = self.timeout_duration;
        let stream = self.stream.as_mut().ok_or(AppError::NotConnected)?;

        if let Err(e) = write_envelope(stream, bytes, timeout_duration).await {
            self.mark_disconnected();
            return Err(e);
        }
        Ok(())
    }

    /// Receive and open one envelope.
    ///
    /// Transport failures drop the connection and yield [`Received::NoFrame`].
    pub async fn receive(&mut self) -> Received {
        if !self.is_connected() {
            return Received::NoFrame;
        }
        let timeout_duration = self.timeout_duration;
        let max_bytes = self.max_frame_bytes;
        let Some(stream) = self.stream.as_mut() else {
            return Received::NoFrame;
        };

        match read_envelope(stream, max_bytes, timeout_duration).await {
            Ok(raw) => open_envelope(&raw, &self.cipher),
            Err(e) => {
                debug!("Receive failed: {e}");
                self.mark_disconnected();
                Received::NoFrame
            }
        }
    }

    fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!("Connection to {} lost", self.addr);
        }
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Release the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closing socket...");
        }
        self.state = ConnectionState::Disconnected;
    }
}
