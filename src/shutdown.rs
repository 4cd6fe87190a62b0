//! Process signals mapped onto a [`CancellationToken`].

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// What a received signal means, given how many arrived before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    Cancel,
    ForceExit,
}

fn action_for(previous: u32) -> SignalAction {
    if previous == 0 {
        SignalAction::Cancel
    } else {
        SignalAction::ForceExit
    }
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            hup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.ok().map(|_| "SIGINT"),
            _ = self.term.recv() => Some("SIGTERM"),
            _ = self.hup.recv() => Some("SIGHUP"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<&'static str> {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some("Ctrl+C"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                None
            }
        }
    }
}

/// The returned token is cancelled by the first SIGINT, SIGTERM or SIGHUP.
/// A second signal exits with status 130.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut received = 0u32;
        while let Some(name) = signals.recv().await {
            match action_for(received) {
                SignalAction::Cancel => {
                    tracing::info!(signal = name, "Stopping sync and downloads");
                    tracing::info!("Send the signal again to exit immediately");
                    cancel.cancel();
                }
                SignalAction::ForceExit => {
                    tracing::warn!(signal = name, "Exiting without cleanup");
                    std::process::exit(130);
                }
            }
            received += 1;
        }
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_cancels_second_exits() {
        assert_eq!(action_for(0), SignalAction::Cancel);
        assert_eq!(action_for(1), SignalAction::ForceExit);
        assert_eq!(action_for(5), SignalAction::ForceExit);
    }

    // Signal delivery can't be exercised safely inside a shared test binary.
    #[tokio::test]
    async fn test_install_returns_live_token() {
        let token = install_signal_handler().unwrap();
        assert!(!token.is_cancelled());
    }
}
