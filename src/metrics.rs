//! Prometheus-compatible metrics endpoint
//!
//! Exposes session engine counters in Prometheus text format.
//! Endpoint: http://localhost:<METRICS_PORT>/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry shared by every session driven in this process
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub sessions_active: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub peers_lost: AtomicU64,
    pub ai_fallbacks: AtomicU64,
    pub ready_timeouts: AtomicU64,

    // Relay traffic
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    // Dropped traffic
    pub protocol_faults: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub self_origin_suppressed: AtomicU64,
    pub held_angle_updates_dropped: AtomicU64,
    pub inbound_overflow: AtomicU64,

    // Transport
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub send_failures: AtomicU64,

    // Tick timing (microseconds)
    pub tick_count: AtomicU64,
    pub tick_time_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    start_time: Instant,

    // Rolling tick times for the max window
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            peers_lost: AtomicU64::new(0),
            ai_fallbacks: AtomicU64::new(0),
            ready_timeouts: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            protocol_faults: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            self_origin_suppressed: AtomicU64::new(0),
            held_angle_updates_dropped: AtomicU64::new(0),
            inbound_overflow: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(600)),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Record a tick time and update the rolling maximum
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        // Keep the last 10 seconds at 60 Hz
        while history.len() > 600 {
            history.pop_front();
        }
        let max = history.iter().copied().max().unwrap_or(0);
        self.tick_time_max_us.store(max, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Saturating so a stray double close cannot wrap the gauge
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("arrowduel_sessions_active", "Sessions currently open", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("arrowduel_sessions_closed_total", "Sessions closed", "counter",
            self.sessions_closed.load(Ordering::Relaxed));
        metric!("arrowduel_peers_lost_total", "Opponents lost mid-match", "counter",
            self.peers_lost.load(Ordering::Relaxed));
        metric!("arrowduel_ai_fallbacks_total", "Sessions degraded to an AI opponent", "counter",
            self.ai_fallbacks.load(Ordering::Relaxed));
        metric!("arrowduel_ready_timeouts_total", "Readiness rendezvous timeouts", "counter",
            self.ready_timeouts.load(Ordering::Relaxed));

        metric!("arrowduel_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("arrowduel_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("arrowduel_bytes_sent_total", "Total payload bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("arrowduel_bytes_received_total", "Total payload bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        metric!("arrowduel_protocol_faults_total", "Malformed or unroutable messages dropped", "counter",
            self.protocol_faults.load(Ordering::Relaxed));
        metric!("arrowduel_duplicates_dropped_total", "Duplicate or stale messages dropped", "counter",
            self.duplicates_dropped.load(Ordering::Relaxed));
        metric!("arrowduel_self_origin_suppressed_total", "Messages about locally owned entities dropped", "counter",
            self.self_origin_suppressed.load(Ordering::Relaxed));
        metric!("arrowduel_held_angle_updates_dropped_total", "State angles ignored while the rotation gate was held", "counter",
            self.held_angle_updates_dropped.load(Ordering::Relaxed));
        metric!("arrowduel_inbound_overflow_total", "Inbound events rejected by a full queue", "counter",
            self.inbound_overflow.load(Ordering::Relaxed));

        metric!("arrowduel_connect_attempts_total", "Transport connect attempts", "counter",
            self.connect_attempts.load(Ordering::Relaxed));
        metric!("arrowduel_connect_failures_total", "Failed transport connect attempts", "counter",
            self.connect_failures.load(Ordering::Relaxed));
        metric!("arrowduel_send_failures_total", "Failed transport send attempts", "counter",
            self.send_failures.load(Ordering::Relaxed));

        metric!("arrowduel_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("arrowduel_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("arrowduel_tick_time_max_microseconds", "Maximum tick time over the last 600 ticks", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("arrowduel_uptime_seconds", "Process uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") {
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK".to_string()
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_session_gauge_saturates() {
        let metrics = Metrics::new();
        metrics.session_opened();
        metrics.session_closed();
        metrics.session_closed();
        assert_eq!(metrics.sessions_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.sessions_closed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        Metrics::add(&metrics.duplicates_dropped, 3);
        Metrics::incr(&metrics.protocol_faults);

        let output = metrics.to_prometheus();

        assert!(output.contains("arrowduel_duplicates_dropped_total 3"));
        assert!(output.contains("arrowduel_protocol_faults_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
