pub mod activity;
pub mod config;
pub mod terminal;
pub mod webhook;

use crate::error::ApiError;
use std::net::{IpAddr, SocketAddr};

const LOCAL_ONLY: &str = "Config updates are allowed from localhost only";

/// Admin routes only answer loopback peers (including IPv4-mapped IPv6).
pub(crate) fn ensure_local(peer: &SocketAddr) -> Result<(), ApiError> {
    let local = match peer.ip() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    };
    if local {
        Ok(())
    } else {
        tracing::warn!(target: "recon::gateway", %peer, "rejected admin request from non-local peer");
        Err(ApiError::forbidden(LOCAL_ONLY))
    }
}
