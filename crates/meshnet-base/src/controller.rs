//! Network controller.
//!
//! The controller owns the attached links and the two tree slots: the
//! `candidate` tree being built by a running discovery round and the
//! `active` tree used for routing. All tree state sits behind one mutex that
//! is never held across a transport write or a sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use meshnet_frame::{Frame, BROADCAST_ADDR};
use meshnet_metrics::metric_defs;
use meshnet_packet::{decode_packet, Packet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::config::NetworkConfig;
use crate::device::DeviceRegistry;
use crate::discovery::{self, DiscoveryHandle, DiscoveryReport};
use crate::link::{random_link_addr, LinkId, SerialLink, Transport};
use crate::rpc::{RpcDispatcher, IDENTIFY_REQUEST};
use crate::tree::{NodeSummary, RootLink, TopologyTree};
use crate::{CancelToken, DiscoveryError, SendError, TreeError};

pub(crate) struct TreeState {
    pub(crate) candidate: Option<TopologyTree>,
    pub(crate) active: Option<TopologyTree>,
}

pub(crate) struct Shared {
    config: NetworkConfig,
    links: RwLock<Vec<Arc<SerialLink>>>,
    pub(crate) state: Mutex<TreeState>,
    registry: Arc<DeviceRegistry>,
    discovery_running: AtomicBool,
}

/// Handle to the base station's network layer.
///
/// Cloning is cheap; every clone drives the same network.
#[derive(Clone)]
pub struct NetworkController {
    pub(crate) shared: Arc<Shared>,
}

/// Non-owning controller handle held by RPC dispatchers.
#[derive(Clone, Debug)]
pub struct WeakController(pub(crate) Weak<Shared>);

impl WeakController {
    /// Get the controller if it still exists.
    pub fn upgrade(&self) -> Option<NetworkController> {
        self.0.upgrade().map(|shared| NetworkController { shared })
    }
}

/// Next AssignAddress to send, collected under the state lock.
pub(crate) struct AssignTarget {
    pub(crate) link: RootLink,
    pub(crate) packet: Packet,
}

/// Marks a discovery round as running; clears the flag and any leftover
/// candidate when dropped.
pub(crate) struct DiscoveryGuard {
    shared: Arc<Shared>,
}

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        self.shared.state.lock().candidate = None;
        self.shared.discovery_running.store(false, Ordering::SeqCst);
    }
}

impl NetworkController {
    /// Create a controller with no links.
    pub fn new(config: NetworkConfig, registry: Arc<DeviceRegistry>) -> Self {
        NetworkController {
            shared: Arc::new(Shared {
                config,
                links: RwLock::new(Vec::new()),
                state: Mutex::new(TreeState {
                    candidate: None,
                    active: None,
                }),
                registry,
                discovery_running: AtomicBool::new(false),
            }),
        }
    }

    /// Get a non-owning handle.
    pub fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.shared))
    }

    /// Network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    /// Device registry shared with the dispatchers.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.shared.registry
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Attach a link that uses `local_addr` as our link address.
    pub fn attach_link(&self, transport: impl Transport + 'static, local_addr: u8) -> LinkId {
        let mut links = self.shared.links.write();
        let id = LinkId::new(links.len());
        links.push(Arc::new(SerialLink::new(id, Box::new(transport), local_addr)));
        info!("Attached {} with link address {}", id, local_addr);
        id
    }

    /// Attach a link with a random link address.
    pub fn attach_link_random_addr(&self, transport: impl Transport + 'static) -> LinkId {
        self.attach_link(transport, random_link_addr())
    }

    /// Number of attached links.
    pub fn link_count(&self) -> usize {
        self.shared.links.read().len()
    }

    /// Our link address on `link_id`.
    pub fn link_addr(&self, link_id: LinkId) -> Option<u8> {
        self.link(link_id).map(|link| link.local_addr())
    }

    fn link(&self, link_id: LinkId) -> Option<Arc<SerialLink>> {
        self.shared.links.read().get(link_id.index()).cloned()
    }

    // ========================================================================
    // Receive Path
    // ========================================================================

    /// Feed bytes read from `link_id`'s transport.
    ///
    /// Safe to call concurrently from one receiver loop per link.
    pub fn on_bytes_received(&self, link_id: LinkId, bytes: &[u8]) {
        let Some(link) = self.link(link_id) else {
            warn!("Received bytes for unknown {}", link_id);
            return;
        };
        for frame in link.receive(bytes) {
            self.handle_frame(link_id, frame);
        }
    }

    fn handle_frame(&self, link_id: LinkId, frame: Frame) {
        let packet = match decode_packet(&frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                metrics::counter!(metric_defs::PACKETS_INVALID.name).increment(1);
                debug!("Invalid packet on {} from {}: {}", link_id, frame.src_addr, e);
                return;
            }
        };
        trace!("{} from {} on {}", packet, frame.src_addr, link_id);

        match &packet {
            Packet::DataToBase {
                source_address,
                data,
            } => self.handle_data_to_base(*source_address, data),
            Packet::BeaconChildResponse { child_nonce, .. } => {
                self.with_verified_candidate(&packet, |tree| {
                    tree.set_root_node(*child_nonce, link_id, frame.src_addr)
                });
            }
            Packet::BeaconParentResponse {
                child_nonce,
                parent_nonce,
                ..
            } => {
                self.with_verified_candidate(&packet, |tree| {
                    tree.set_relationship(*parent_nonce, *child_nonce)
                });
            }
            Packet::DataToDevice { .. } | Packet::Beacon { .. } | Packet::AssignAddress { .. } => {
                debug!("Ignoring {} on {}", packet.packet_type(), link_id);
            }
        }
    }

    /// Verify a beacon response against the candidate tree and apply `update`.
    ///
    /// Structural violations poison the candidate; the discovery task aborts
    /// the round when it next looks. A node first reported after addresses
    /// were handed out is ignored.
    fn with_verified_candidate(
        &self,
        packet: &Packet,
        update: impl FnOnce(&mut TopologyTree) -> Result<(), TreeError>,
    ) {
        let network_key = self.shared.config.network_key;
        let mut state = self.shared.state.lock();
        let Some(candidate) = state.candidate.as_mut() else {
            trace!("No discovery running, ignoring {}", packet.packet_type());
            return;
        };

        if let Err(e) = packet.verify_hmac(candidate.base_nonce(), network_key) {
            metrics::counter!(
                metric_defs::PACKETS_HMAC_FAILED.name,
                "packet_type" => packet.packet_type().name()
            )
            .increment(1);
            debug!("{}", e);
            return;
        }

        match update(candidate) {
            Ok(()) => {}
            Err(TreeError::AlreadyFinalized { nonce }) => {
                metrics::counter!(metric_defs::LATE_RESPONSES.name).increment(1);
                debug!(
                    "Late {} for {:#010x}, addresses already handed out",
                    packet.packet_type(),
                    nonce
                );
            }
            Err(e) => {
                warn!("Discovery round poisoned: {}", e);
                candidate.record_fault(e);
            }
        }
    }

    fn handle_data_to_base(&self, source_address: u8, data: &[u8]) {
        let dispatcher = {
            let mut state = self.shared.state.lock();
            let TreeState { candidate, active } = &mut *state;
            let found = [candidate.as_mut(), active.as_mut()]
                .into_iter()
                .flatten()
                .find_map(|tree| tree.id_by_address(source_address).map(|id| (tree, id)));

            let Some((tree, id)) = found else {
                metrics::counter!(metric_defs::DATA_UNKNOWN_SOURCE.name).increment(1);
                debug!("Data from unknown address {}", source_address);
                return;
            };

            if tree.mark_assigned(id) {
                debug!(
                    "Node {:#010x} confirmed address {}",
                    tree.node(id).nonce(),
                    source_address
                );
            }
            match tree.node(id).dispatcher() {
                Some(dispatcher) => dispatcher.clone(),
                None => {
                    let dispatcher = Arc::new(RpcDispatcher::new(
                        source_address,
                        self.downgrade(),
                        self.shared.registry.clone(),
                    ));
                    tree.attach_dispatcher(id, dispatcher.clone());
                    dispatcher
                }
            }
        };

        metrics::counter!(metric_defs::DATA_RX.name).increment(1);
        if let Err(e) = dispatcher.on_packet_received(data) {
            debug!("Dropped data from address {}: {}", source_address, e);
        }
    }

    // ========================================================================
    // Send Path
    // ========================================================================

    /// Send `payload` to the device at `dest_address` through the active tree.
    pub fn send_data_to_device(&self, dest_address: u8, payload: &[u8]) -> Result<(), SendError> {
        let route = {
            let state = self.shared.state.lock();
            state
                .active
                .as_ref()
                .and_then(|tree| tree.route_for(dest_address))
                .and_then(|root| root.root_link())
        };
        let route = route.ok_or(SendError::UnroutableAddress(dest_address))?;

        let packet = Packet::DataToDevice {
            dest_address,
            data: payload.to_vec(),
        };
        self.send_packet(route, &packet)?;
        metrics::counter!(metric_defs::DATA_TX.name).increment(1);
        Ok(())
    }

    /// Send a packet to a neighbor.
    pub(crate) fn send_packet(&self, route: RootLink, packet: &Packet) -> Result<(), SendError> {
        let link = self
            .link(route.link_id)
            .ok_or(SendError::UnknownLink(route.link_id))?;
        link.send_frame(route.link_addr, &packet.encode())
    }

    /// Broadcast a packet on every link; returns the number of links written.
    pub(crate) fn broadcast(&self, packet: &Packet) -> usize {
        let links: Vec<_> = self.shared.links.read().clone();
        let bytes = packet.encode();
        let mut sent = 0;
        for link in links {
            match link.send_frame(BROADCAST_ADDR, &bytes) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Broadcast on {} failed: {}", link.id(), e),
            }
        }
        sent
    }

    /// Ask every addressed node of the active tree that has not identified
    /// to do so. Returns the number of requests sent.
    pub fn request_identify(&self) -> usize {
        let mut sent = 0;
        for node in self.active_summary() {
            let (Some(address), None) = (node.address, node.device_id) else {
                continue;
            };
            let result = match self.dispatcher_for(address) {
                Some(dispatcher) => dispatcher.send_identify_request(),
                None => self.send_data_to_device(address, &IDENTIFY_REQUEST),
            };
            match result {
                Ok(()) => sent += 1,
                Err(e) => warn!("Identify request to {} failed: {}", address, e),
            }
        }
        sent
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Spawn a discovery round on the current tokio runtime.
    pub fn start_discovery(&self) -> Result<DiscoveryHandle, DiscoveryError> {
        let guard = self.begin_discovery()?;
        let token = CancelToken::new();
        let task_token = token.clone();
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            discovery::run_round(&controller, &task_token).await
        });
        Ok(DiscoveryHandle::new(token, handle))
    }

    /// Run a discovery round on the calling task.
    pub async fn run_discovery(&self, token: CancelToken) -> Result<DiscoveryReport, DiscoveryError> {
        let _guard = self.begin_discovery()?;
        discovery::run_round(self, &token).await
    }

    /// Whether a round is running.
    pub fn is_discovery_running(&self) -> bool {
        self.shared.discovery_running.load(Ordering::SeqCst)
    }

    fn begin_discovery(&self) -> Result<DiscoveryGuard, DiscoveryError> {
        self.shared
            .discovery_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DiscoveryError::DiscoveryInProgress)?;
        Ok(DiscoveryGuard {
            shared: self.shared.clone(),
        })
    }

    pub(crate) fn install_candidate(&self, tree: TopologyTree) {
        self.shared.state.lock().candidate = Some(tree);
    }

    /// Fail if the candidate recorded a structural violation.
    pub(crate) fn check_candidate(&self) -> Result<(), TreeError> {
        let state = self.shared.state.lock();
        match state.candidate.as_ref().and_then(|tree| tree.fault()) {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    /// Calculate candidate addresses; returns `(known, addressed)` node counts.
    pub(crate) fn finalize_candidate(&self) -> Result<(usize, usize), TreeError> {
        let mut state = self.shared.state.lock();
        let Some(tree) = state.candidate.as_mut() else {
            return Ok((0, 0));
        };
        if let Some(fault) = tree.fault() {
            return Err(fault.clone());
        }
        let addressed = tree.finalize_addresses()?;
        Ok((tree.len(), addressed))
    }

    /// Pick the next node for this assign round and count the send.
    pub(crate) fn next_assign_target(&self, round: u32) -> Result<Option<AssignTarget>, TreeError> {
        let network_key = self.shared.config.network_key;
        let mut state = self.shared.state.lock();
        let Some(tree) = state.candidate.as_mut() else {
            return Ok(None);
        };
        if let Some(fault) = tree.fault() {
            return Err(fault.clone());
        }

        while let Some(id) = tree.next_unassigned(round) {
            tree.record_assign_sent(id);
            let node = tree.node(id);
            let (Some(address), Some(max_route)) = (node.address(), node.max_route()) else {
                continue;
            };
            let Some(link) = tree.route_for(address).and_then(|root| root.root_link()) else {
                continue;
            };
            let packet = Packet::assign_address(
                node.nonce(),
                address,
                max_route,
                tree.base_nonce(),
                network_key,
            );
            return Ok(Some(AssignTarget { link, packet }));
        }
        Ok(None)
    }

    /// Replace the active tree with the candidate.
    pub(crate) fn promote_candidate(&self) -> Result<DiscoveryReport, TreeError> {
        let mut state = self.shared.state.lock();
        let Some(tree) = state.candidate.take() else {
            return Err(TreeError::inconsistent("candidate tree disappeared"));
        };
        if let Some(fault) = tree.fault() {
            return Err(fault.clone());
        }

        let report = DiscoveryReport {
            base_nonce: tree.base_nonce(),
            nodes: tree.len(),
            addressed: tree.summaries().iter().filter(|s| s.address.is_some()).count(),
            assigned: tree.assigned_count(),
            ..Default::default()
        };
        metrics::gauge!(metric_defs::ACTIVE_NODES.name).set(report.addressed as f64);
        metrics::gauge!(metric_defs::ACTIVE_ASSIGNED.name).set(report.assigned as f64);
        state.active = Some(tree);
        Ok(report)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Run `f` on the active tree.
    ///
    /// `f` runs with the controller's state lock held and must not call back
    /// into the controller; use [`active_summary`](Self::active_summary) for
    /// anything that sends.
    pub fn with_active_tree<R>(&self, f: impl FnOnce(&TopologyTree) -> R) -> Option<R> {
        self.shared.state.lock().active.as_ref().map(f)
    }

    /// Summaries of the active tree's nodes.
    pub fn active_summary(&self) -> Vec<NodeSummary> {
        self.with_active_tree(|tree| tree.summaries())
            .unwrap_or_default()
    }

    /// Dispatcher of the active node at `address`, if it has sent data.
    pub fn dispatcher_for(&self, address: u8) -> Option<Arc<RpcDispatcher>> {
        self.with_active_tree(|tree| tree.node_by_address(address)?.dispatcher().cloned())
            .flatten()
    }
}

impl std::fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkController")
            .field("config", &self.shared.config)
            .field("links", &self.link_count())
            .field("discovery_running", &self.is_discovery_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use meshnet_frame::{encode_frame, FrameDecoder};

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<Vec<u8>>>);

    impl Transport for Capture {
        fn write(&self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().push(bytes.to_vec());
            Ok(())
        }
    }

    fn controller() -> NetworkController {
        NetworkController::new(NetworkConfig::default(), Arc::new(DeviceRegistry::new()))
    }

    #[test]
    fn test_attach_links() {
        let controller = controller();
        let a = controller.attach_link(Capture::default(), 10);
        let b = controller.attach_link_random_addr(Capture::default());
        assert_ne!(a, b);
        assert_eq!(controller.link_count(), 2);
        assert_eq!(controller.link_addr(a), Some(10));
        assert_ne!(controller.link_addr(b), Some(0));
        assert_eq!(controller.link_addr(LinkId::new(5)), None);
    }

    #[test]
    fn test_unroutable_without_active_tree() {
        let controller = controller();
        controller.attach_link(Capture::default(), 10);
        assert!(matches!(
            controller.send_data_to_device(3, &[1]),
            Err(SendError::UnroutableAddress(3))
        ));
    }

    #[test]
    fn test_responses_without_discovery_are_ignored() {
        let controller = controller();
        let link = controller.attach_link(Capture::default(), 10);
        let response = Packet::beacon_child_response(1, 2, controller.config().network_key);
        controller.on_bytes_received(link, &encode_frame(7, 10, &response.encode()).unwrap());
        assert!(controller.with_active_tree(|_| ()).is_none());
    }

    #[test]
    fn test_send_through_active_tree() {
        let controller = controller();
        let capture = Arc::new(Capture::default());
        let link = controller.attach_link(capture.clone(), 10);

        let mut tree = TopologyTree::new(5);
        tree.set_root_node(1, link, 33).unwrap();
        tree.set_relationship(1, 2).unwrap();
        tree.finalize_addresses().unwrap();
        controller.shared.state.lock().active = Some(tree);

        controller.send_data_to_device(1, &[9, 8]).unwrap();

        let written = capture.0.lock().pop().unwrap();
        let frames = FrameDecoder::new(33).push(&written);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].src_addr, 10);
        assert_eq!(
            decode_packet(&frames[0].payload).unwrap(),
            Packet::DataToDevice {
                dest_address: 1,
                data: vec![9, 8]
            }
        );
        assert!(matches!(
            controller.send_data_to_device(2, &[]),
            Err(SendError::UnroutableAddress(2))
        ));
    }

    #[test]
    fn test_begin_discovery_is_exclusive() {
        let controller = controller();
        let guard = controller.begin_discovery().unwrap();
        assert!(controller.is_discovery_running());
        assert!(matches!(
            controller.begin_discovery(),
            Err(DiscoveryError::DiscoveryInProgress)
        ));
        drop(guard);
        assert!(!controller.is_discovery_running());
        assert!(controller.begin_discovery().is_ok());
    }
}
