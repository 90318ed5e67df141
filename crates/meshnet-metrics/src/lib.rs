//! Metrics for the MeshNet base stack.
//!
//! This crate re-exports the `metrics` facade and declares every metric the
//! stack emits as a [`Metric`] constant, so call sites never spell metric
//! names by hand.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshnet_metrics::{describe_metrics, metric_defs};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::FRAMES_DROPPED.name, "reason" => "crc").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric declaration.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "meshnet.frame.rx").
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    /// Human-readable description.
    pub description: &'static str,
}

impl Metric {
    const fn counter(name: &'static str, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Counter,
            unit: Unit::Count,
            description,
        }
    }

    const fn gauge(name: &'static str, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Gauge,
            unit: Unit::Count,
            description,
        }
    }

    const fn histogram(name: &'static str, unit: Unit, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Histogram,
            unit,
            description,
        }
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions for the stack.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Link / Framing Layer
    // ========================================================================

    /// Frames that passed CRC and address filtering.
    pub const FRAMES_RX: Metric =
        Metric::counter("meshnet.frame.rx", "Frames accepted by the framing decoder");

    /// Frames discarded by the decoder.
    ///
    /// Labels: reason (`crc`, `oversize`, `not_for_us`)
    pub const FRAMES_DROPPED: Metric =
        Metric::counter("meshnet.frame.dropped", "Frames discarded by the framing decoder");

    /// Encoded frames written to a transport.
    pub const FRAMES_TX: Metric =
        Metric::counter("meshnet.frame.tx", "Frames written to a link transport");

    /// Bytes written to transports after stuffing.
    pub const FRAME_TX_BYTES: Metric = Metric::histogram(
        "meshnet.frame.tx_bytes",
        Unit::Bytes,
        "Stuffed size of transmitted frames",
    );

    // ========================================================================
    // Packet Layer
    // ========================================================================

    pub const PACKETS_INVALID: Metric =
        Metric::counter("meshnet.packet.invalid", "Frame payloads that are not valid packets");

    /// Labels: packet_type
    pub const PACKETS_HMAC_FAILED: Metric = Metric::counter(
        "meshnet.packet.hmac_failed",
        "Control packets rejected by HMAC verification",
    );

    pub const DATA_UNKNOWN_SOURCE: Metric = Metric::counter(
        "meshnet.data.unknown_source",
        "Data packets from an address not present in any tree",
    );

    pub const DATA_TX: Metric =
        Metric::counter("meshnet.data.tx", "Data packets sent toward devices");

    pub const DATA_RX: Metric =
        Metric::counter("meshnet.data.rx", "Data packets received from known devices");

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Labels: outcome (`started`, `promoted`, `aborted`, `cancelled`)
    pub const DISCOVERY_ROUNDS: Metric =
        Metric::counter("meshnet.discovery.rounds", "Discovery rounds by outcome");

    pub const ASSIGN_SENT: Metric =
        Metric::counter("meshnet.discovery.assign_sent", "AssignAddress packets transmitted");

    /// Beacon responses that named a new node after addresses were handed out.
    pub const LATE_RESPONSES: Metric = Metric::counter(
        "meshnet.discovery.late_responses",
        "Beacon responses ignored because the candidate tree was already addressed",
    );

    pub const ACTIVE_NODES: Metric =
        Metric::gauge("meshnet.tree.active_nodes", "Nodes in the active topology tree");

    pub const ACTIVE_ASSIGNED: Metric = Metric::gauge(
        "meshnet.tree.active_assigned",
        "Active tree nodes that confirmed their address",
    );

    // ========================================================================
    // RPC
    // ========================================================================

    /// Labels: reason (`unidentified`, `unknown_command`)
    pub const RPC_DROPPED: Metric =
        Metric::counter("meshnet.rpc.dropped", "Inbound device commands that were dropped");

    pub const ALL: &[&Metric] = &[
        &FRAMES_RX,
        &FRAMES_DROPPED,
        &FRAMES_TX,
        &FRAME_TX_BYTES,
        &PACKETS_INVALID,
        &PACKETS_HMAC_FAILED,
        &DATA_UNKNOWN_SOURCE,
        &DATA_TX,
        &DATA_RX,
        &DISCOVERY_ROUNDS,
        &ASSIGN_SENT,
        &LATE_RESPONSES,
        &ACTIVE_NODES,
        &ACTIVE_ASSIGNED,
        &RPC_DROPPED,
    ];
}

/// Describes all metrics used by the stack.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Installs a Prometheus exporter listening on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
