//! Prometheus metrics for the node.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Node-level metrics, scraped via the gateway's `/metrics` endpoint.
pub struct NodeMetrics {
    registry: Registry,

    /// Latest committed block height.
    pub committed_height: IntGauge,
    /// Current consensus round.
    pub current_round: IntGauge,
    /// Current consensus height.
    pub current_height: IntGauge,
    /// Inbox submissions dropped because the queue was full, by message type.
    pub dropped_messages: IntCounterVec,
    /// Recorded equivocation evidence.
    pub evidence_records: IntGauge,
}

impl NodeMetrics {
    /// Create and register all metrics.
    pub fn new() -> Self {
        let registry = Registry::new();

        let committed_height =
            IntGauge::new("bedrock_committed_height", "Latest committed block height")
                .expect("valid metric");
        let current_round =
            IntGauge::new("bedrock_current_round", "Current consensus round").expect("valid metric");
        let current_height =
            IntGauge::new("bedrock_current_height", "Current consensus height")
                .expect("valid metric");
        let dropped_messages = IntCounterVec::new(
            Opts::new(
                "bedrock_dropped_messages_total",
                "Inbox submissions dropped because the queue was full",
            ),
            &["type"],
        )
        .expect("valid metric");
        let evidence_records =
            IntGauge::new("bedrock_evidence_records", "Recorded equivocation evidence")
                .expect("valid metric");

        for collector in [
            Box::new(committed_height.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(current_round.clone()),
            Box::new(current_height.clone()),
            Box::new(dropped_messages.clone()),
            Box::new(evidence_records.clone()),
        ] {
            registry.register(collector).expect("unique metric");
        }

        NodeMetrics {
            registry,
            committed_height,
            current_round,
            current_height,
            dropped_messages,
            evidence_records,
        }
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
