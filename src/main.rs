use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arrowduel_session::config::SessionConfig;
use arrowduel_session::game::constants::bow;
use arrowduel_session::metrics::{self, Metrics};
use arrowduel_session::net::driver::SessionDriver;
use arrowduel_session::net::memory::MemoryHub;
use arrowduel_session::net::transport::{Credentials, MatchCriteria};
use arrowduel_session::session::context::{CloseReason, SessionContext, SessionEvent};
use arrowduel_session::util::vec3::Vec3;

/// Scripted player for the demo duel
struct DemoPlayer {
    name: &'static str,
    accuracy: f64,
    clock: f32,
    next_shot: f32,
    started: bool,
}

impl DemoPlayer {
    fn new(name: &'static str, accuracy: f64) -> Self {
        Self {
            name,
            accuracy,
            clock: 0.0,
            next_shot: 1.0,
            started: false,
        }
    }

    fn on_tick(&mut self, ctx: &mut SessionContext, events: &[SessionEvent], dt: f32) {
        for event in events {
            match event {
                SessionEvent::BothPresent(authority) => {
                    info!("[{}] opponent present, authority={}", self.name, authority.is_authority);
                    ctx.declare_ready();
                }
                SessionEvent::MatchStarted { outcome, .. } => {
                    info!("[{}] match started ({:?})", self.name, outcome);
                    self.started = true;
                }
                SessionEvent::TargetHit { update, .. } => {
                    info!(
                        "[{}] {} scores {} (opponent hearts {:.1})",
                        self.name, update.shooter, update.points, update.victim_hearts
                    );
                }
                SessionEvent::ThemeChanged(selection) => {
                    info!("[{}] theme changed to {}", self.name, selection.current_theme);
                }
                SessionEvent::MatchCompleted { winner, phase } => {
                    info!("[{}] match over: {} won ({:?})", self.name, winner, phase);
                    ctx.leave();
                    return;
                }
                _ => {}
            }
        }

        if !self.started || ctx.is_closed() {
            return;
        }
        self.clock += dt;
        let angle = (self.clock * 45.0).sin() * 60.0;
        ctx.update_local_bow(Vec3::new(if ctx.is_authority() { -8.0 } else { 8.0 }, 0.0, 0.0), angle);

        if self.clock < self.next_shot {
            return;
        }
        let mut rng = rand::thread_rng();
        self.next_shot = self.clock + rng.gen_range(0.8..2.0);
        let result = ctx.hold_rotation().and_then(|_| {
            let shot = ctx.fire_arrow(
                Vec3::ZERO,
                angle + bow::ROTATION_OFFSET,
                rng.gen_range(bow::MIN_FORCE..bow::MAX_FORCE),
                false,
            )?;
            if rng.gen_bool(self.accuracy) {
                ctx.report_hit(shot)?;
            }
            ctx.release_rotation()
        });
        if let Err(e) = result {
            warn!("[{}] {}", self.name, e.user_message());
        }
    }
}

async fn play(
    hub: MemoryHub,
    name: &'static str,
    accuracy: f64,
    config: SessionConfig,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> Option<CloseReason> {
    let dt = 1.0 / config.tick_rate as f32;
    let driver = match SessionDriver::open(
        Arc::new(hub.transport()),
        &Credentials::new(name.to_lowercase(), name),
        &MatchCriteria::AnyOpen,
        config,
        metrics,
        cancel,
    )
    .await
    {
        Ok(driver) => driver,
        Err(e) => {
            error!("[{}] {}: {}", name, e.user_message(), e);
            return None;
        }
    };

    let mut player = DemoPlayer::new(name, accuracy);
    Some(driver.run(move |ctx, events| player.on_tick(ctx, events, dt)).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arrow Duel session demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {} Hz, sync every {}s, ready timeout {}s",
        config.tick_rate, config.state_sync_interval, config.ready_timeout
    );

    let metrics = Arc::new(Metrics::new());
    if let Some(port) = config.metrics_port {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let hub = MemoryHub::new();
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        }
    };
    tokio::spawn(ctrl_c);

    let (alice, bob) = tokio::join!(
        play(hub.clone(), "Alice", 0.6, config.clone(), metrics.clone(), cancel.child_token()),
        play(hub.clone(), "Bob", 0.5, config.clone(), metrics.clone(), cancel.child_token()),
    );

    for (name, reason) in [("Alice", alice), ("Bob", bob)] {
        match reason.as_ref().and_then(CloseReason::to_error) {
            Some(e) => warn!("{} finished: {}", name, e.user_message()),
            None => info!("{} finished: {:?}", name, reason),
        }
    }
    info!("{}", metrics.to_prometheus());

    Ok(())
}
