// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Websocket publisher for queue change sets.
//!
//! Connects to the evaluator's dispatch endpoint with an optional `token`
//! header and optional TLS trust root passed as PEM bytes. On a dropped
//! connection the queue reconnects with exponential backoff and republishes
//! its full differ view so observers converge.

use armada_core::Event;
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The socket dropped; reconnect and resync.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Reconnection gave up past the backoff cap.
    #[error("connect to {url} failed after {attempts} attempts: {last}")]
    Fatal { url: String, attempts: usize, last: String },

    #[error("invalid evaluator url {0:?}")]
    BadUrl(String),

    #[error("bad certificate: {0}")]
    BadCert(String),

    #[error(transparent)]
    Encode(#[from] armada_core::EventDecodeError),
}

/// Connection parameters for the queue→evaluator direction.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub url: String,
    pub token: Option<String>,
    /// PEM bytes of the trust root for `wss` URLs.
    pub cert_pem: Option<Vec<u8>>,
    pub open_timeout: Duration,
    pub ping_interval: Duration,
    pub max_connect_attempts: usize,
    pub backoff_start: Duration,
    pub backoff_cap: Duration,
}

impl PublisherConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            cert_pem: None,
            open_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(60),
            max_connect_attempts: 10,
            backoff_start: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }

    armada_core::setters! {
        set {
            open_timeout: Duration,
            ping_interval: Duration,
            max_connect_attempts: usize,
            backoff_start: Duration,
            backoff_cap: Duration,
        }
        option {
            token: String,
            cert_pem: Vec<u8>,
        }
    }
}

/// One websocket connection owned by the queue's execute loop.
pub struct QueuePublisher {
    config: PublisherConfig,
    ws: Option<WsStream>,
    last_send: Instant,
}

impl QueuePublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self { config, ws: None, last_send: Instant::now() }
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    /// Connect if not already connected, with backoff.
    pub async fn ensure_connected(&mut self) -> Result<(), PublishError> {
        if self.ws.is_none() {
            self.reconnect().await?;
        }
        Ok(())
    }

    /// Drop any existing socket and reconnect with exponential backoff.
    pub async fn reconnect(&mut self) -> Result<(), PublishError> {
        self.ws = None;
        let mut delay = self.config.backoff_start;
        let mut last = String::new();
        for attempt in 1..=self.config.max_connect_attempts {
            match self.connect_once().await {
                Ok(ws) => {
                    tracing::debug!(url = %self.config.url, attempt, "publisher connected");
                    self.ws = Some(ws);
                    self.last_send = Instant::now();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(url = %self.config.url, attempt, error = %e, "publisher connect failed");
                    last = e;
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.backoff_cap);
        }
        Err(PublishError::Fatal {
            url: self.config.url.clone(),
            attempts: self.config.max_connect_attempts,
            last,
        })
    }

    async fn connect_once(&self) -> Result<WsStream, String> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| format!("bad url: {e}"))?;
        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(token).map_err(|e| format!("bad token: {e}"))?;
            request.headers_mut().insert("token", value);
        }
        let connector = match &self.config.cert_pem {
            Some(pem) => Some(Connector::Rustls(Arc::new(
                tls_client_config(pem).map_err(|e| e.to_string())?,
            ))),
            None => None,
        };

        let connect = connect_async_tls_with_config(request, None, false, connector);
        match tokio::time::timeout(self.config.open_timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("open timed out after {:?}", self.config.open_timeout)),
        }
    }

    /// Send a batch of events as one frame per event.
    pub async fn publish(&mut self, events: &[Event]) -> Result<(), PublishError> {
        self.ensure_connected().await?;
        let Some(mut ws) = self.ws.take() else {
            return Err(PublishError::ConnectionLost("no socket".to_string()));
        };

        if self.last_send.elapsed() >= self.config.ping_interval {
            if let Err(e) = ws.send(Message::Ping(Vec::new().into())).await {
                return Err(PublishError::ConnectionLost(e.to_string()));
            }
        }

        for event in events {
            let text = event.to_json()?;
            if let Err(e) = ws.send(Message::text(text)).await {
                return Err(PublishError::ConnectionLost(e.to_string()));
            }
        }
        self.last_send = Instant::now();
        self.ws = Some(ws);
        Ok(())
    }

    /// Close the socket cleanly; idempotent.
    pub async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
    }
}

/// Build a rustls client config trusting exactly the given PEM roots.
pub fn tls_client_config(pem: &[u8]) -> Result<rustls::ClientConfig, PublishError> {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = std::io::BufReader::new(pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| PublishError::BadCert(e.to_string()))?;
        roots.add(cert).map_err(|e| PublishError::BadCert(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(PublishError::BadCert("no certificates in PEM".to_string()));
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PublishError::BadCert(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
