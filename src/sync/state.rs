//! Derivation of [`SyncState`] from the latest engine and network samples.
//!
//! The result depends only on the pair passed in; nothing is remembered
//! between evaluations.

use crate::connectivity::NetworkStatus;
use crate::status::SyncState;

use super::engine::ReplicationStatus;

/// Evaluated in priority order: an active transfer outranks a stale
/// "no network" sample, and a network-shaped engine error collapses to
/// [`SyncState::NoNetwork`].
pub fn derive_sync_state(
    status: Option<&ReplicationStatus>,
    network: Option<NetworkStatus>,
) -> SyncState {
    let Some(status) = status else {
        return SyncState::Connecting;
    };

    if status.connected {
        return SyncState::Connected;
    }
    if status.downloading {
        let progress = status
            .download_progress
            .map(|p| p.fraction())
            .unwrap_or(0.0);
        return SyncState::Downloading { progress };
    }
    if status.uploading {
        return SyncState::Uploading;
    }
    if status.connecting {
        return SyncState::Connecting;
    }
    if let Some(err) = &status.any_error {
        if err.is_network() {
            return SyncState::NoNetwork;
        }
        return SyncState::Error {
            message: err.message.clone(),
        };
    }
    if network == Some(NetworkStatus::Disconnected) {
        return SyncState::NoNetwork;
    }
    SyncState::Connecting
}
