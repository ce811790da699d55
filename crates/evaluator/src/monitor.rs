// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor client — the observer side of the evaluator bus.
//!
//! Connects to the `/client` endpoint, yields incoming envelopes one at a
//! time and sends the `EE_USER_DONE` / `EE_USER_CANCEL` control events.

use crate::config::ConnectionInfo;
use armada_core::{Event, EventPayload, Source};
use armada_queue::publisher::tls_client_config;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error(transparent)]
    Encode(#[from] armada_core::EventDecodeError),
}

/// One monitor connection.
pub struct Monitor {
    ws: WsStream,
    id: String,
}

impl Monitor {
    /// Single connection attempt with the configured open timeout.
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, MonitorError> {
        let url = info.client_uri();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| MonitorError::Connect { url: url.clone(), reason: e.to_string() })?;
        if let Some(token) = &info.token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| MonitorError::Connect { url: url.clone(), reason: e.to_string() })?;
            request.headers_mut().insert("token", value);
        }
        let connector = match &info.cert_pem {
            Some(pem) => Some(Connector::Rustls(Arc::new(tls_client_config(pem).map_err(
                |e| MonitorError::Connect { url: url.clone(), reason: e.to_string() },
            )?))),
            None => None,
        };

        let connect = connect_async_tls_with_config(request, None, false, connector);
        let ws = match tokio::time::timeout(info.open_timeout, connect).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                return Err(MonitorError::Connect { url, reason: e.to_string() });
            }
            Err(_) => {
                return Err(MonitorError::Connect { url, reason: "open timed out".to_string() });
            }
        };

        let id = Uuid::new_v4().to_string();
        tracing::debug!(monitor = %id, %url, "monitor connected");
        Ok(Self { ws, id })
    }

    /// Retry `connect` a bounded number of times.
    pub async fn connect_with_retry(
        info: &ConnectionInfo,
        attempts: usize,
        delay: Duration,
    ) -> Result<Self, MonitorError> {
        let mut last = MonitorError::Connect {
            url: info.client_uri(),
            reason: "no attempts made".to_string(),
        };
        for attempt in 1..=attempts.max(1) {
            match Self::connect(info).await {
                Ok(monitor) => return Ok(monitor),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "monitor connect failed");
                    last = e;
                }
            }
            tokio::time::sleep(delay).await;
        }
        Err(last)
    }

    /// Next event from the evaluator; `None` once the stream ends.
    ///
    /// Malformed frames are dropped with a warning.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match Event::from_json(&text) {
                    Ok(event) => return Some(event),
                    Err(e) => tracing::warn!(error = %e, "dropping malformed monitor frame"),
                },
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => {} // Ping/Pong/Binary
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "monitor stream error");
                    return None;
                }
            }
        }
    }

    async fn send_control(&mut self, payload: EventPayload) -> Result<(), MonitorError> {
        let source = Source::from(format!("/monitor/{}", self.id));
        let event = Event::now(source, payload);
        let text = event.to_json()?;
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|e| MonitorError::ConnectionClosed(e.to_string()))
    }

    /// Tell the evaluator this monitor is done consuming.
    pub async fn signal_done(&mut self) -> Result<(), MonitorError> {
        self.send_control(EventPayload::EeUserDone).await
    }

    /// Ask the evaluator to cancel the running ensemble.
    pub async fn signal_cancel(&mut self) -> Result<(), MonitorError> {
        self.send_control(EventPayload::EeUserCancel).await
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
