//! Signal handling for `gear-queue serve`.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// [`Node::run`](crate::node::Node::run) stops accepting connections and
/// ends its orphan reaper once the token fires. Requests already in flight
/// still complete.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        let received = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "Stopping queue node");
        trigger.cancel();
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_stays_live_until_a_signal_arrives() {
        let token = install_shutdown_handler().unwrap();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }
}
