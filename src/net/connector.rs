//! Connect and matchmaking flow
//!
//! The only operations that suspend the caller. Each has a bounded wait and an
//! explicit outcome, and all of them abort promptly when the session's
//! cancellation token fires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::game::constants::retry;
use crate::metrics::Metrics;
use crate::net::inbound::InboundSender;
use crate::net::transport::{Credentials, MatchCriteria, SessionHandle, Transport, TransportError};
use crate::session::error::SessionError;
use crate::session::participant::Participant;

/// Backoff before retry number `attempt` (1-based): base, 2x base, 4x base...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor)
        .min(Duration::from_millis(retry::MAX_DELAY_MS))
}

/// Connect with a per-attempt timeout, retrying with exponential backoff
pub async fn connect_with_retry<T: Transport>(
    transport: &T,
    credentials: &Credentials,
    config: &SessionConfig,
    cancel: &CancellationToken,
    metrics: &Metrics,
) -> Result<Participant, SessionError> {
    let attempts = config.max_retry_attempts.max(1);
    let mut last_error = TransportError::NotConnected;

    for attempt in 1..=attempts {
        Metrics::incr(&metrics.connect_attempts);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = tokio::time::timeout(config.connect_timeout, transport.connect(credentials)) => result,
        };

        match result {
            Ok(Ok(participant)) => {
                info!("Connected as {} (attempt {}/{})", participant.id, attempt, attempts);
                return Ok(participant);
            }
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = TransportError::Timeout,
        }
        Metrics::incr(&metrics.connect_failures);

        if attempt < attempts {
            let delay = backoff_delay(config.retry_delay, attempt);
            warn!(
                "Connect attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, attempts, last_error, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    warn!("Giving up after {} connect attempts: {}", attempts, last_error);
    Err(SessionError::ServerUnreachable {
        attempts,
        source: last_error,
    })
}

/// Join or match within the matchmaking timeout
pub async fn join_with_timeout<T: Transport>(
    transport: &T,
    criteria: &MatchCriteria,
    inbound: InboundSender,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> Result<SessionHandle, SessionError> {
    let result = tokio::select! {
        _ = cancel.cancelled() => return Err(SessionError::Cancelled),
        result = tokio::time::timeout(config.matchmaking_timeout, transport.join_or_match(criteria, inbound)) => result,
    };

    match result {
        Ok(Ok(handle)) => {
            info!("Joined session {}", handle.session_id);
            Ok(handle)
        }
        Ok(Err(e)) => {
            warn!("Join failed: {}", e);
            Err(SessionError::Transport(e))
        }
        Err(_) => {
            warn!("Matchmaking timed out after {:?}", config.matchmaking_timeout);
            Err(SessionError::NoOpponentFound)
        }
    }
}

/// Connect then join, sharing one cancellation token
pub async fn establish<T: Transport>(
    transport: &T,
    credentials: &Credentials,
    criteria: &MatchCriteria,
    inbound: InboundSender,
    config: &SessionConfig,
    cancel: &CancellationToken,
    metrics: &Metrics,
) -> Result<SessionHandle, SessionError> {
    connect_with_retry(transport, credentials, config, cancel, metrics).await?;
    join_with_timeout(transport, criteria, inbound, config, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::net::inbound::InboundQueue;
    use crate::session::error::Recovery;
    use crate::session::participant::TransportHandle;

    /// Fails the first `failures` connects; `hang` makes connects never resolve
    struct FlakyTransport {
        failures: u32,
        hang: bool,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32, hang: bool) -> Self {
            Self {
                failures,
                hang,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Transport for FlakyTransport {
        fn connect(
            &self,
            credentials: &Credentials,
        ) -> impl Future<Output = Result<Participant, TransportError>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let hang = self.hang;
            let failures = self.failures;
            let participant = Participant::new(
                credentials.participant.clone(),
                credentials.display_name.clone(),
                TransportHandle::generate(),
            );
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                if call < failures {
                    Err(TransportError::ConnectFailed("refused".into()))
                } else {
                    Ok(participant)
                }
            }
        }

        fn join_or_match(
            &self,
            _criteria: &MatchCriteria,
            _inbound: InboundSender,
        ) -> impl Future<Output = Result<SessionHandle, TransportError>> + Send {
            async { std::future::pending().await }
        }

        fn send(
            &self,
            _session_id: &str,
            _op: i64,
            _payload: Vec<u8>,
        ) -> impl Future<Output = Result<(), TransportError>> + Send {
            async { Ok(()) }
        }

        fn leave(&self, _session_id: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
            async { Ok(()) }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(1),
            matchmaking_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(base, 10), Duration::from_millis(retry::MAX_DELAY_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_after_retries() {
        let transport = FlakyTransport::new(2, false);
        let metrics = Metrics::new();
        let creds = Credentials::new("alice", "Alice");
        let participant =
            connect_with_retry(&transport, &creds, &config(), &CancellationToken::new(), &metrics)
                .await
                .unwrap();
        assert_eq!(participant.id.as_str(), "alice");
        assert_eq!(metrics.connect_attempts.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.connect_failures.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_as_unreachable() {
        let transport = FlakyTransport::new(10, false);
        let creds = Credentials::new("alice", "Alice");
        let err = connect_with_retry(&transport, &creds, &config(), &CancellationToken::new(), &Metrics::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ServerUnreachable { attempts: 3, .. }));
        assert_eq!(err.recovery(), Recovery::Retry);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attempt_times_out() {
        let transport = FlakyTransport::new(0, true);
        let creds = Credentials::new("alice", "Alice");
        let err = connect_with_retry(&transport, &creds, &config(), &CancellationToken::new(), &Metrics::new())
            .await
            .unwrap_err();
        match err {
            SessionError::ServerUnreachable { source, .. } => assert_eq!(source, TransportError::Timeout),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_connect() {
        let transport = FlakyTransport::new(0, true);
        let cancel = CancellationToken::new();
        let creds = Credentials::new("alice", "Alice");
        let cfg = config();
        let metrics = Metrics::new();
        let task = connect_with_retry(&transport, &creds, &cfg, &cancel, &metrics);
        cancel.cancel();
        assert!(matches!(task.await, Err(SessionError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_matchmaking_timeout_is_no_opponent() {
        let transport = FlakyTransport::new(0, false);
        let queue = InboundQueue::new(4);
        let err = join_with_timeout(
            &transport,
            &MatchCriteria::AnyOpen,
            queue.sender(),
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::NoOpponentFound));
        assert_eq!(err.recovery(), Recovery::Wait);
    }
}
