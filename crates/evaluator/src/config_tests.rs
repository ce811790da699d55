// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn connection_info_urls() {
    let config = EvaluatorServerConfig::default().token("secret");
    let addr: SocketAddr = "127.0.0.1:51820".parse().unwrap();
    let info = config.connection_info(addr);

    assert_eq!(info.base_url, "ws://127.0.0.1:51820");
    assert_eq!(info.client_uri(), "ws://127.0.0.1:51820/client");
    assert_eq!(info.dispatch_uri(), "ws://127.0.0.1:51820/dispatch");
    assert_eq!(info.token.as_deref(), Some("secret"));
}

#[test]
fn tls_switches_scheme() {
    let config = EvaluatorServerConfig::default().tls(TlsMaterial {
        cert_chain_pem: vec![],
        key_pem: vec![],
    });
    let addr: SocketAddr = "127.0.0.1:443".parse().unwrap();
    assert!(config.connection_info(addr).base_url.starts_with("wss://"));
}
