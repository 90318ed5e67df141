//! Discovery rounds.
//!
//! A round beacons every link, collects responses into a fresh candidate
//! tree, hands out addresses with bounded retransmission, and finally
//! promotes the candidate to the active tree. Every wait observes the
//! round's [`CancelToken`]; an aborted or cancelled round leaves the active
//! tree untouched.

use meshnet_metrics::metric_defs;
use meshnet_packet::Packet;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::NetworkController;
use crate::tree::TopologyTree;
use crate::{CancelToken, DiscoveryError};

/// Outcome of a successful round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Nonce beaconed in this round.
    pub base_nonce: u32,
    /// Nodes that answered, reachable or not.
    pub nodes: usize,
    /// Nodes that received an address.
    pub addressed: usize,
    /// Nodes that confirmed their address before promotion.
    pub assigned: usize,
    /// Assign rounds that sent at least one packet.
    pub assign_rounds: u32,
    /// AssignAddress packets sent.
    pub assign_sent: u32,
}

/// A discovery round running on its own task.
#[derive(Debug)]
pub struct DiscoveryHandle {
    token: CancelToken,
    handle: JoinHandle<Result<DiscoveryReport, DiscoveryError>>,
}

impl DiscoveryHandle {
    pub(crate) fn new(
        token: CancelToken,
        handle: JoinHandle<Result<DiscoveryReport, DiscoveryError>>,
    ) -> Self {
        DiscoveryHandle { token, handle }
    }

    /// Ask the round to stop at its next wait.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The round's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the round to finish.
    pub async fn join(self) -> Result<DiscoveryReport, DiscoveryError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DiscoveryError::TaskFailed(e.to_string())),
        }
    }
}

pub(crate) async fn run_round(
    controller: &NetworkController,
    token: &CancelToken,
) -> Result<DiscoveryReport, DiscoveryError> {
    metrics::counter!(metric_defs::DISCOVERY_ROUNDS.name, "outcome" => "started").increment(1);

    let result = discover_and_assign(controller, token).await;
    let outcome = match &result {
        Ok(report) => {
            info!(
                "Discovery round {:#010x} done: {} nodes, {} addressed, {} assigned",
                report.base_nonce, report.nodes, report.addressed, report.assigned
            );
            "promoted"
        }
        Err(DiscoveryError::Cancelled) => {
            info!("Discovery round cancelled");
            "cancelled"
        }
        Err(e) => {
            warn!("Discovery round aborted: {}", e);
            "aborted"
        }
    };
    metrics::counter!(metric_defs::DISCOVERY_ROUNDS.name, "outcome" => outcome).increment(1);
    result
}

async fn discover_and_assign(
    controller: &NetworkController,
    token: &CancelToken,
) -> Result<DiscoveryReport, DiscoveryError> {
    let config = controller.config().clone();
    let base_nonce: u32 = rand::random();
    controller.install_candidate(TopologyTree::new(base_nonce));
    info!("Starting discovery round {:#010x}", base_nonce);

    // Discover
    let beacon = Packet::Beacon {
        network_id: config.network_id,
        base_nonce,
    };
    if controller.broadcast(&beacon) == 0 {
        warn!("Beacon was not sent on any link");
    }
    pause(token, config.beacon_settle()).await?;
    controller.check_candidate()?;

    // Assign
    let (nodes, addressed) = controller.finalize_candidate()?;
    debug!("{} nodes answered, {} addressed", nodes, addressed);

    let mut assign_rounds = 0;
    let mut assign_sent = 0;
    for round in 1..=config.max_retries {
        let mut sent_this_round = 0;
        loop {
            if token.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            let Some(target) = controller.next_assign_target(round)? else {
                break;
            };
            sent_this_round += 1;
            metrics::counter!(metric_defs::ASSIGN_SENT.name).increment(1);
            debug!("Round {}: {} via {}", round, target.packet, target.link.link_id);
            if let Err(e) = controller.send_packet(target.link, &target.packet) {
                warn!("AssignAddress send failed: {}", e);
            }
        }

        if sent_this_round == 0 {
            break;
        }
        assign_rounds = round;
        assign_sent += sent_this_round;
        pause(token, config.assign_settle()).await?;
        controller.check_candidate()?;
    }

    // Promote
    let report = controller.promote_candidate()?;
    Ok(DiscoveryReport {
        assign_rounds,
        assign_sent,
        ..report
    })
}

async fn pause(token: &CancelToken, duration: std::time::Duration) -> Result<(), DiscoveryError> {
    token
        .sleep(duration)
        .await
        .map_err(|_| DiscoveryError::Cancelled)
}
