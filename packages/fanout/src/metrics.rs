//! Server metrics for observability
//!
//! Relaxed atomic counters bumped from the hub, the gate and the pumps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Upgraded connections not yet closed (authenticating or registered)
    pub active_connections: AtomicU64,
    /// Total upgraded connections since server start
    pub total_connections: AtomicU64,

    // Authentication metrics
    /// Connections that never presented a credential in time
    pub auth_timeouts: AtomicU64,
    /// Connections whose credential was rejected
    pub auth_rejections: AtomicU64,

    // Message metrics
    /// Data frames received from clients
    pub messages_received: AtomicU64,
    /// Broadcasts fanned out by the hub
    pub broadcasts: AtomicU64,
    /// Data frames written to clients
    pub frames_written: AtomicU64,
    /// Payloads that rode along in an already-started frame
    pub payloads_coalesced: AtomicU64,

    // Failure metrics
    /// Clients evicted because their outbound queue was full
    pub slow_consumer_evictions: AtomicU64,
    /// Clients reaped because no pong arrived before the read deadline
    pub heartbeat_timeouts: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
    /// Wall-clock start time, reported in snapshots
    started_at: Option<DateTime<Utc>>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Authentication tracking
    pub fn auth_timed_out(&self) {
        self.auth_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_rejected(&self) {
        self.auth_rejections.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_written(&self, payloads: u64) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.payloads_coalesced
            .fetch_add(payloads.saturating_sub(1), Ordering::Relaxed);
    }

    // Failure tracking
    pub fn slow_consumer_evicted(&self) {
        self.slow_consumer_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timed_out(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            auth: AuthMetrics {
                timeouts: self.auth_timeouts.load(Ordering::Relaxed),
                rejections: self.auth_rejections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                broadcasts: self.broadcasts.load(Ordering::Relaxed),
                frames_written: self.frames_written.load(Ordering::Relaxed),
                coalesced: self.payloads_coalesced.load(Ordering::Relaxed),
            },
            evictions: EvictionMetrics {
                slow_consumers: self.slow_consumer_evictions.load(Ordering::Relaxed),
                heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub auth: AuthMetrics,
    pub messages: MessageMetrics,
    pub evictions: EvictionMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMetrics {
    pub timeouts: u64,
    pub rejections: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub broadcasts: u64,
    pub frames_written: u64,
    pub coalesced: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionMetrics {
    pub slow_consumers: u64,
    pub heartbeat_timeouts: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub members: u64,
    pub connections: u64,
    pub uptime_secs: u64,
}
