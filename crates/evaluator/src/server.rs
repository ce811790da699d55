// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluator websocket server.
//!
//! Two endpoints: `/dispatch` ingests events from the queue and job
//! runners, `/client` broadcasts snapshot events to monitors and accepts
//! their control events. Monitors get the latest full snapshot on connect,
//! then live updates; no per-monitor backlog is kept beyond socket buffers.

use crate::config::{EvaluatorServerConfig, TlsMaterial};
use armada_core::Event;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad TLS material: {0}")]
    Tls(String),
    #[error(transparent)]
    Encode(#[from] armada_core::EventDecodeError),
}

/// The running server; dropped or shut down at iteration end.
pub struct EvaluatorServer {
    addr: SocketAddr,
    broadcast_tx: broadcast::Sender<String>,
    greeting: Arc<Mutex<Option<Event>>>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl EvaluatorServer {
    /// Bind and start serving. Returns the server handle and the stream of
    /// ingested events (dispatch traffic plus monitor control events).
    pub async fn start(
        config: EvaluatorServerConfig,
    ) -> Result<(Self, mpsc::Receiver<Event>), ServerError> {
        let listener = TcpListener::bind(config.bind).await?;
        let addr = listener.local_addr()?;
        let acceptor = match &config.tls {
            Some(material) => Some(build_acceptor(material)?),
            None => None,
        };

        let (events_tx, events_rx) = mpsc::channel(1024);
        let (broadcast_tx, _) = broadcast::channel(1024);
        let greeting: Arc<Mutex<Option<Event>>> = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            config.token.clone(),
            events_tx,
            broadcast_tx.clone(),
            Arc::clone(&greeting),
            cancel.clone(),
        ));

        tracing::info!(%addr, tls = config.tls.is_some(), "evaluator server listening");
        let server = Self {
            addr,
            broadcast_tx,
            greeting,
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
        };
        Ok((server, events_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Broadcast one event to all connected monitors.
    pub fn broadcast(&self, event: &Event) -> Result<(), ServerError> {
        let text = event.to_json()?;
        // No receivers is fine; monitors may not have connected yet.
        let _ = self.broadcast_tx.send(text);
        Ok(())
    }

    /// Set the event sent to each monitor on connect (the latest full
    /// snapshot).
    pub fn set_greeting(&self, event: Option<Event>) {
        *self.greeting.lock() = event;
    }

    /// Stop accepting and close all connection loops; idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    token: Option<String>,
    events_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<String>,
    greeting: Arc<Mutex<Option<Event>>>,
    cancel: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        tokio::spawn(handle_connection(
            stream,
            acceptor.clone(),
            token.clone(),
            events_tx.clone(),
            broadcast_tx.clone(),
            Arc::clone(&greeting),
            cancel.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    token: Option<String>,
    events_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<String>,
    greeting: Arc<Mutex<Option<Event>>>,
    cancel: CancellationToken,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => serve_ws(tls, token, events_tx, broadcast_tx, greeting, cancel).await,
            Err(e) => tracing::warn!(error = %e, "TLS accept failed"),
        },
        None => serve_ws(stream, token, events_tx, broadcast_tx, greeting, cancel).await,
    }
}

async fn serve_ws<S>(
    stream: S,
    token: Option<String>,
    events_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<String>,
    greeting: Arc<Mutex<Option<Event>>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut path = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        if let Some(expected) = &token {
            let provided = request
                .headers()
                .get("token")
                .and_then(|value| value.to_str().ok());
            if provided != Some(expected.as_str()) {
                tracing::warn!(path = %path, "rejecting connection with bad token");
                let mut reject = ErrorResponse::new(None);
                *reject.status_mut() = StatusCode::UNAUTHORIZED;
                return Err(reject);
            }
        }
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(error = %e, "websocket handshake failed");
            return;
        }
    };

    match path.as_str() {
        "/dispatch" => dispatch_loop(ws, events_tx, cancel).await,
        "/client" => client_loop(ws, events_tx, broadcast_tx, greeting, cancel).await,
        other => {
            tracing::warn!(path = %other, "unknown endpoint, closing");
        }
    }
}

/// Ingest loop: every text frame is one event envelope.
async fn dispatch_loop<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    events_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (_, mut stream) = ws.split();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => match Event::from_json(&text) {
                Ok(event) => {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed dispatch frame"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // Ping/Pong/Binary
            Some(Err(e)) => {
                tracing::debug!(error = %e, "dispatch connection error");
                break;
            }
        }
    }
}

/// Monitor loop: forward broadcasts out, accept control events in.
async fn client_loop<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    events_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<String>,
    greeting: Arc<Mutex<Option<Event>>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut rx = broadcast_tx.subscribe();
    let (mut sink, mut stream) = ws.split();

    let hello = greeting.lock().clone();
    if let Some(event) = hello {
        match event.to_json() {
            Ok(text) => {
                if sink.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode greeting snapshot"),
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            broadcasted = rx.recv() => match broadcasted {
                Ok(text) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "monitor lagging, skipped broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match Event::from_json(&text) {
                    Ok(event) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed monitor frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "monitor connection error");
                    break;
                }
            },
        }
    }
    let _ = sink.close().await;
}

fn build_acceptor(material: &TlsMaterial) -> Result<TlsAcceptor, ServerError> {
    let certs = rustls_pemfile::certs(&mut &material.cert_chain_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    if certs.is_empty() {
        return Err(ServerError::Tls("no certificates in PEM".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut &material.key_pem[..])
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .ok_or_else(|| ServerError::Tls("no private key in PEM".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
