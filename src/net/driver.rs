//! Session tick loop
//!
//! Runs a [`SessionContext`] at the configured tick rate, flushes its outbound
//! messages through the transport and hands each tick's events to gameplay.
//! A send that still fails after the retry budget closes the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::metrics::Metrics;
use crate::net::connector::{self, backoff_delay};
use crate::net::inbound::InboundQueue;
use crate::net::transport::{Credentials, MatchCriteria, Transport, TransportError};
use crate::session::context::{CloseReason, SessionContext, SessionEvent};
use crate::session::error::SessionError;
use crate::session::relay::Outbound;

enum SendFailure {
    Cancelled,
    Exhausted { attempts: u32, error: TransportError },
}

pub struct SessionDriver<T: Transport> {
    transport: Arc<T>,
    context: SessionContext,
    metrics: Arc<Metrics>,
    tick_rate: u32,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl<T: Transport> SessionDriver<T> {
    pub fn new(transport: Arc<T>, context: SessionContext, metrics: Arc<Metrics>) -> Self {
        let config = context.config();
        let tick_rate = config.tick_rate.max(1);
        let retry_attempts = config.max_retry_attempts.max(1);
        let retry_delay = config.retry_delay;
        Self {
            transport,
            context,
            metrics,
            tick_rate,
            retry_attempts,
            retry_delay,
        }
    }

    /// Connect, join or match, and wrap the joined session in a driver
    pub async fn open(
        transport: Arc<T>,
        credentials: &Credentials,
        criteria: &MatchCriteria,
        config: SessionConfig,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let inbound = InboundQueue::new(config.inbound_capacity);
        let handle = connector::establish(
            transport.as_ref(),
            credentials,
            criteria,
            inbound.sender(),
            &config,
            &cancel,
            &metrics,
        )
        .await?;
        let context = SessionContext::new(config, handle, inbound, cancel, metrics.clone());
        Ok(Self::new(transport, context, metrics))
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    /// Tick until the session closes. `on_events` runs once per tick, after
    /// the tick, and may drive the context (fire arrows, declare ready...).
    pub async fn run<F>(mut self, mut on_events: F) -> CloseReason
    where
        F: FnMut(&mut SessionContext, &[SessionEvent]),
    {
        let dt = 1.0 / self.tick_rate as f32;
        let cancel = self.context.cancel_token();
        let mut ticker = interval(std::time::Duration::from_secs_f32(dt));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Session {} loop started at {} Hz",
            self.context.session_id(),
            self.tick_rate
        );
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                // The next tick observes the token and closes the session
                _ = cancel.cancelled() => {}
            }
            tick_count += 1;
            let started = Instant::now();

            let events = self.context.tick(dt);
            self.flush(&cancel).await;
            on_events(&mut self.context, &events);
            self.flush(&cancel).await;

            self.metrics.record_tick_time(started.elapsed());

            if self.context.is_closed() {
                break;
            }

            if tick_count % (self.tick_rate as u64 * 30) == 0 {
                debug!(
                    "Session {}: tick {}, {:?}, phase {:?}",
                    self.context.session_id(),
                    tick_count,
                    self.context.lifecycle(),
                    self.context.match_state().phase()
                );
            }
        }

        let reason = self
            .context
            .close_reason()
            .cloned()
            .unwrap_or(CloseReason::LocalLeave);
        if !matches!(reason, CloseReason::TransportClosed(_) | CloseReason::SendFailed { .. }) {
            if let Err(e) = self.transport.leave(self.context.session_id()).await {
                warn!("Leave failed for session {}: {}", self.context.session_id(), e);
            }
        }
        info!("Session {} loop stopped: {:?}", self.context.session_id(), reason);
        reason
    }

    /// Send everything the context queued, in order
    async fn flush(&mut self, cancel: &CancellationToken) {
        for out in self.context.take_outbound() {
            match self.send_with_retry(out, cancel).await {
                Ok(()) => {}
                // The next tick sees the token and closes the session
                Err(SendFailure::Cancelled) => return,
                Err(SendFailure::Exhausted { attempts, error }) => {
                    self.context.transport_failed(attempts, error);
                    return;
                }
            }
        }
    }

    async fn send_with_retry(&mut self, out: Outbound, cancel: &CancellationToken) -> Result<(), SendFailure> {
        let session_id = self.context.session_id();
        let mut attempt = 1;
        loop {
            let error = match self.transport.send(session_id, out.op.code(), out.payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            Metrics::incr(&self.metrics.send_failures);
            if attempt >= self.retry_attempts {
                return Err(SendFailure::Exhausted {
                    attempts: attempt,
                    error,
                });
            }

            let delay = backoff_delay(self.retry_delay, attempt);
            warn!(
                "Send of {} failed (attempt {}/{}): {}. Retrying in {:?}",
                out.op, attempt, self.retry_attempts, error, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(SendFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(all(test, feature = "memory_transport"))]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};

    use smallvec::smallvec;

    use crate::net::inbound::{InboundEvent, InboundSender, PresenceList};
    use crate::net::memory::MemoryHub;
    use crate::net::transport::SessionHandle;
    use crate::session::error::Recovery;
    use crate::session::participant::{Participant, ParticipantId, TransportHandle};

    /// Joins fine with bob already present, then every send fails
    #[derive(Default)]
    struct DeadSocket {
        sends: AtomicU32,
    }

    impl Transport for DeadSocket {
        fn connect(
            &self,
            credentials: &Credentials,
        ) -> impl Future<Output = Result<Participant, TransportError>> + Send {
            let me = Participant::new(
                credentials.participant.clone(),
                credentials.display_name.clone(),
                TransportHandle::generate(),
            );
            async move { Ok(me) }
        }

        fn join_or_match(
            &self,
            _criteria: &MatchCriteria,
            inbound: InboundSender,
        ) -> impl Future<Output = Result<SessionHandle, TransportError>> + Send {
            async move {
                let bob = Participant::new(ParticipantId::new("bob"), "Bob", TransportHandle::generate());
                inbound
                    .try_send(InboundEvent::Presence {
                        joins: smallvec![bob],
                        leaves: PresenceList::new(),
                    })
                    .unwrap();
                Ok(SessionHandle {
                    session_id: "S9".into(),
                    local: Participant::new(ParticipantId::new("alice"), "Alice", TransportHandle::generate()),
                })
            }
        }

        fn send(
            &self,
            _session_id: &str,
            _op: i64,
            _payload: Vec<u8>,
        ) -> impl Future<Output = Result<(), TransportError>> + Send {
            self.sends.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::NotConnected) }
        }

        fn leave(&self, _session_id: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
            async { Ok(()) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let hub = MemoryHub::new();
        let metrics = Arc::new(Metrics::new());
        let cancel = CancellationToken::new();
        let driver = SessionDriver::open(
            Arc::new(hub.transport()),
            &Credentials::new("alice", "Alice"),
            &MatchCriteria::AnyOpen,
            SessionConfig::default(),
            metrics.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();
        let session_id = driver.context().session_id().to_string();
        assert_eq!(hub.members(&session_id).len(), 1);

        let task = tokio::spawn(driver.run(|_, _| {}));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert!(hub.members(&session_id).is_empty());
        assert!(metrics.tick_count.load(Ordering::Relaxed) > 0);
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_drop_closes_session() {
        let hub = MemoryHub::new();
        let metrics = Arc::new(Metrics::new());
        let driver = SessionDriver::open(
            Arc::new(hub.transport()),
            &Credentials::new("alice", "Alice"),
            &MatchCriteria::Session("S1".into()),
            SessionConfig::default(),
            metrics,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let task = tokio::spawn(driver.run(|_, _| {}));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        hub.drop_participant("S1", &"alice".into(), "server restart");
        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::TransportClosed("server restart".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sends_close_session() {
        let transport = Arc::new(DeadSocket::default());
        let metrics = Arc::new(Metrics::new());
        let config = SessionConfig {
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let driver = SessionDriver::open(
            transport.clone(),
            &Credentials::new("alice", "Alice"),
            &MatchCriteria::AnyOpen,
            config,
            metrics.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let run = driver.run(|ctx, events| {
            if events.iter().any(|e| matches!(e, SessionEvent::BothPresent(_))) {
                ctx.declare_ready();
            }
        });
        let reason = tokio::time::timeout(Duration::from_secs(30), run).await.unwrap();

        assert_eq!(
            reason,
            CloseReason::SendFailed {
                attempts: 3,
                error: TransportError::NotConnected,
            }
        );
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.send_failures.load(Ordering::Relaxed), 3);

        let err = reason.to_error().unwrap();
        assert!(matches!(err, SessionError::ServerUnreachable { attempts: 3, .. }));
        assert_eq!(err.recovery(), Recovery::Retry);
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
    }
}
