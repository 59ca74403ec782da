//! UDP listeners for RADIUS authentication and accounting.
//!
//! A thin adapter: datagrams are parsed, handed to the core pipeline, and
//! the decision is mapped to Access-Accept/Access-Reject with a
//! Reply-Message attribute. Each datagram is served on its own task; each
//! listener tracks its handler tasks and drains them on shutdown so
//! in-flight requests finish before the accounting file and store close.

pub mod packet;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use soholink_core::pipeline::{AcctKind, NasContext, Pipeline};

use packet::{attr, Packet};

/// Cap on waiting for in-flight request handlers during shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

pub struct RadiusServer {
    auth_address: String,
    acct_address: String,
    shared_secret: String,
    pipeline: Arc<Pipeline>,
}

impl RadiusServer {
    pub fn new(
        auth_address: String,
        acct_address: String,
        shared_secret: String,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            auth_address,
            acct_address,
            shared_secret,
            pipeline,
        }
    }

    /// Bind both sockets and serve until the token is cancelled, then
    /// drain in-flight handlers up to the drain deadline.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let auth_socket = Arc::new(UdpSocket::bind(&self.auth_address).await?);
        let acct_socket = Arc::new(UdpSocket::bind(&self.acct_address).await?);

        info!(address = %self.auth_address, "RADIUS auth server listening");
        info!(address = %self.acct_address, "RADIUS accounting server listening");

        let auth = tokio::spawn(auth_loop(
            auth_socket,
            self.shared_secret.clone(),
            Arc::clone(&self.pipeline),
            shutdown.clone(),
        ));
        let acct = tokio::spawn(acct_loop(
            acct_socket,
            self.shared_secret.clone(),
            Arc::clone(&self.pipeline),
            shutdown,
        ));

        let _ = tokio::join!(auth, acct);
        Ok(())
    }
}

async fn auth_loop(
    socket: Arc<UdpSocket>,
    secret: String,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) {
    let mut buf = [0u8; 4096];
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "auth socket receive failed");
                        continue;
                    }
                };
                let raw = buf[..len].to_vec();
                handlers.spawn(handle_auth(
                    Arc::clone(&socket),
                    peer,
                    raw,
                    secret.clone(),
                    Arc::clone(&pipeline),
                ));
            }
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            _ = shutdown.cancelled() => {
                info!("auth server stopping");
                break;
            }
        }
    }
    drain_handlers(handlers, "auth").await;
}

async fn handle_auth(
    socket: Arc<UdpSocket>,
    peer: std::net::SocketAddr,
    raw: Vec<u8>,
    secret: String,
    pipeline: Arc<Pipeline>,
) {
    let request = match Packet::parse(&raw) {
        Ok(p) => p,
        Err(e) => {
            debug!(%peer, error = %e, "dropping malformed auth packet");
            return;
        }
    };
    if request.code != packet::ACCESS_REQUEST {
        debug!(%peer, code = request.code, "dropping unexpected auth packet");
        return;
    }

    let username = request.attribute_string(attr::USER_NAME).unwrap_or_default();
    let token = request.decrypt_pap_password(&secret).unwrap_or_default();
    let nas = nas_context(&request, peer);

    let decision = pipeline.authenticate(&nas, &username, &token).await;

    let code = if decision.is_allow() {
        packet::ACCESS_ACCEPT
    } else {
        packet::ACCESS_REJECT
    };
    let mut response = request.response(code);
    response.add_attribute(attr::REPLY_MESSAGE, decision.reply_message().as_bytes());

    let bytes = response.encode_response(&request.authenticator, &secret);
    if let Err(e) = socket.send_to(&bytes, peer).await {
        warn!(%peer, error = %e, "failed to send auth response");
    }
}

async fn acct_loop(
    socket: Arc<UdpSocket>,
    secret: String,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) {
    let mut buf = [0u8; 4096];
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "accounting socket receive failed");
                        continue;
                    }
                };
                let raw = buf[..len].to_vec();
                handlers.spawn(handle_acct(
                    Arc::clone(&socket),
                    peer,
                    raw,
                    secret.clone(),
                    Arc::clone(&pipeline),
                ));
            }
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            _ = shutdown.cancelled() => {
                info!("accounting server stopping");
                break;
            }
        }
    }
    drain_handlers(handlers, "accounting").await;
}

async fn handle_acct(
    socket: Arc<UdpSocket>,
    peer: std::net::SocketAddr,
    raw: Vec<u8>,
    secret: String,
    pipeline: Arc<Pipeline>,
) {
    let request = match Packet::parse(&raw) {
        Ok(p) => p,
        Err(e) => {
            debug!(%peer, error = %e, "dropping malformed accounting packet");
            return;
        }
    };
    if request.code != packet::ACCOUNTING_REQUEST {
        return;
    }
    if !secret.is_empty() && !Packet::verify_accounting_authenticator(&raw, &secret) {
        warn!(%peer, "dropping accounting packet with bad authenticator");
        return;
    }

    let username = request.attribute_string(attr::USER_NAME).unwrap_or_default();
    let session_id = request
        .attribute_string(attr::ACCT_SESSION_ID)
        .unwrap_or_default();
    let kind = match request
        .attribute(attr::ACCT_STATUS_TYPE)
        .filter(|v| v.len() == 4)
        .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
    {
        Some(1) => AcctKind::Start,
        Some(2) => AcctKind::Stop,
        Some(3) => AcctKind::Interim,
        _ => AcctKind::Unknown,
    };

    let nas = nas_context(&request, peer);
    pipeline.report(&nas, kind, &session_id, &username);

    // Always acknowledged, per RFC 2866.
    let response = request.response(packet::ACCOUNTING_RESPONSE);
    let bytes = response.encode_response(&request.authenticator, &secret);
    if let Err(e) = socket.send_to(&bytes, peer).await {
        warn!(%peer, error = %e, "failed to send accounting response");
    }
}

/// Wait for a listener's in-flight handlers, bounded by the drain
/// deadline. Handlers still running at the deadline are aborted.
async fn drain_handlers(mut handlers: JoinSet<()>, listener: &str) {
    if handlers.is_empty() {
        return;
    }

    info!(listener, in_flight = handlers.len(), "draining in-flight requests");
    let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
        while handlers.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            listener,
            remaining = handlers.len(),
            "drain deadline exceeded, aborting remaining handlers"
        );
        handlers.shutdown().await;
    }
}

fn nas_context(request: &Packet, peer: std::net::SocketAddr) -> NasContext {
    let nas_address = request
        .attribute(attr::NAS_IP_ADDRESS)
        .filter(|v| v.len() == 4)
        .map(|v| Ipv4Addr::new(v[0], v[1], v[2], v[3]).to_string())
        .unwrap_or_default();

    NasContext {
        nas_address,
        nas_identifier: request
            .attribute_string(attr::NAS_IDENTIFIER)
            .unwrap_or_default(),
        client_ip: peer.to_string(),
    }
}
