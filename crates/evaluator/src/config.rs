// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluator server configuration and connection info handed to clients.

use std::net::SocketAddr;
use std::time::Duration;

/// Server-side TLS material, both PEM bytes.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_chain_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Where and how the evaluator listens.
#[derive(Debug, Clone)]
pub struct EvaluatorServerConfig {
    /// Bind address; port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    /// Required `token` header on every websocket handshake when set.
    pub token: Option<String>,
    /// Serve TLS when set.
    pub tls: Option<TlsMaterial>,
    /// Trust root clients should pin (PEM bytes), usually the serving cert.
    pub client_cert_pem: Option<Vec<u8>>,
}

impl Default for EvaluatorServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            token: None,
            tls: None,
            client_cert_pem: None,
        }
    }
}

impl EvaluatorServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self { bind, ..Default::default() }
    }

    armada_core::setters! {
        set {
            bind: SocketAddr,
        }
        option {
            token: String,
            tls: TlsMaterial,
            client_cert_pem: Vec<u8>,
        }
    }

    /// Connection info for a server bound at `addr`.
    pub fn connection_info(&self, addr: SocketAddr) -> ConnectionInfo {
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        ConnectionInfo {
            base_url: format!("{scheme}://{addr}"),
            token: self.token.clone(),
            cert_pem: self.client_cert_pem.clone(),
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything a client needs to reach the evaluator.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub base_url: String,
    pub token: Option<String>,
    pub cert_pem: Option<Vec<u8>>,
    pub open_timeout: Duration,
}

impl ConnectionInfo {
    /// Monitor endpoint.
    pub fn client_uri(&self) -> String {
        format!("{}/client", self.base_url)
    }

    /// Queue/job-runner endpoint.
    pub fn dispatch_uri(&self) -> String {
        format!("{}/dispatch", self.base_url)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
