//! Topology tree of one discovery round.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The tree is
//! built from beacon responses, then [`TopologyTree::finalize_addresses`]
//! hands every node reachable from a root a contiguous pre-order range of
//! mesh addresses: a node's `address` is the first address of its subtree and
//! `max_route` the last one. After that the structure is frozen; only the
//! per-node assignment state and RPC dispatchers change.

use std::collections::HashMap;
use std::sync::Arc;

use crate::link::LinkId;
use crate::rpc::RpcDispatcher;
use crate::TreeError;

/// Number of distinct mesh addresses.
pub const ADDRESS_SPACE: usize = 256;

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// How the base reaches a root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootLink {
    /// Link the root answered on.
    pub link_id: LinkId,
    /// The root's link address on that link.
    pub link_addr: u8,
}

/// A device in the tree.
#[derive(Debug)]
pub struct Node {
    nonce: u32,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    root: Option<RootLink>,
    address: Option<u8>,
    max_route: Option<u8>,
    assigned: bool,
    assign_sent: u32,
    dispatcher: Option<Arc<RpcDispatcher>>,
}

impl Node {
    fn new(nonce: u32) -> Self {
        Node {
            nonce,
            parent: None,
            children: Vec::new(),
            root: None,
            address: None,
            max_route: None,
            assigned: false,
            assign_sent: 0,
            dispatcher: None,
        }
    }

    /// Nonce the node answered the beacon with.
    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Parent node, `None` for roots and orphans.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in the order they were reported.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Link information if the node is a root.
    pub fn root_link(&self) -> Option<RootLink> {
        self.root
    }

    /// Whether the node hears the base directly.
    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }

    /// Mesh address, once calculated.
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    /// Last address of the node's subtree, once calculated.
    pub fn max_route(&self) -> Option<u8> {
        self.max_route
    }

    /// Whether the node has been heard from since its address was sent.
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// AssignAddress packets sent to this node.
    pub fn assign_sent(&self) -> u32 {
        self.assign_sent
    }

    /// RPC dispatcher, attached on first data packet.
    pub fn dispatcher(&self) -> Option<&Arc<RpcDispatcher>> {
        self.dispatcher.as_ref()
    }

    fn covers(&self, address: u8) -> bool {
        match (self.address, self.max_route) {
            (Some(start), Some(end)) => start <= address && address <= end,
            _ => false,
        }
    }
}

/// One row of [`TopologyTree::summaries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    /// Node nonce.
    pub nonce: u32,
    /// Parent nonce, `None` for roots.
    pub parent_nonce: Option<u32>,
    /// Distance from the base (roots are 0).
    pub depth: usize,
    /// Root link, for roots.
    pub root: Option<RootLink>,
    /// Mesh address.
    pub address: Option<u8>,
    /// Last address of the subtree.
    pub max_route: Option<u8>,
    /// Whether the node confirmed its address.
    pub assigned: bool,
    /// AssignAddress packets sent.
    pub assign_sent: u32,
    /// Unique id of the device bound to this node, if identified.
    pub device_id: Option<u32>,
}

/// Tree of nodes discovered in one round.
#[derive(Debug)]
pub struct TopologyTree {
    base_nonce: u32,
    nodes: Vec<Node>,
    by_nonce: HashMap<u32, NodeId>,
    by_address: HashMap<u8, NodeId>,
    roots: Vec<NodeId>,
    finalized: bool,
    fault: Option<TreeError>,
}

impl TopologyTree {
    /// Create an empty tree for the round that beaconed `base_nonce`.
    pub fn new(base_nonce: u32) -> Self {
        TopologyTree {
            base_nonce,
            nodes: Vec::new(),
            by_nonce: HashMap::new(),
            by_address: HashMap::new(),
            roots: Vec::new(),
            finalized: false,
            fault: None,
        }
    }

    /// Nonce of the round this tree belongs to.
    pub fn base_nonce(&self) -> u32 {
        self.base_nonce
    }

    /// Number of known nodes, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether addresses have been calculated.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Root nodes in the order they answered.
    pub fn roots(&self) -> impl Iterator<Item = &Node> + '_ {
        self.roots.iter().map(|&id| &self.nodes[id.0])
    }

    /// Get a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Look up a node by nonce.
    pub fn node_by_nonce(&self, nonce: u32) -> Option<&Node> {
        self.by_nonce.get(&nonce).map(|&id| &self.nodes[id.0])
    }

    /// Look up a node id by nonce.
    pub fn id_by_nonce(&self, nonce: u32) -> Option<NodeId> {
        self.by_nonce.get(&nonce).copied()
    }

    /// Look up a node by mesh address.
    pub fn node_by_address(&self, address: u8) -> Option<&Node> {
        self.by_address.get(&address).map(|&id| &self.nodes[id.0])
    }

    /// Look up a node id by mesh address.
    pub fn id_by_address(&self, address: u8) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    /// Record a node that heard the beacon directly on `link_id`.
    pub fn set_root_node(
        &mut self,
        nonce: u32,
        link_id: LinkId,
        link_addr: u8,
    ) -> Result<(), TreeError> {
        let Some(&id) = self.by_nonce.get(&nonce) else {
            if self.finalized {
                return Err(TreeError::AlreadyFinalized { nonce });
            }
            let id = self.insert(nonce);
            self.nodes[id.0].root = Some(RootLink { link_id, link_addr });
            self.roots.push(id);
            return Ok(());
        };

        let node = &self.nodes[id.0];
        match node.root {
            Some(root) if root.link_id == link_id => Ok(()),
            Some(root) => Err(TreeError::inconsistent(format!(
                "root {:#010x} answered on {} and {}",
                nonce, root.link_id, link_id
            ))),
            None if node.parent.is_some() => Err(TreeError::inconsistent(format!(
                "node {:#010x} already has a parent",
                nonce
            ))),
            None if self.finalized => Err(TreeError::AlreadyFinalized { nonce }),
            None => {
                self.nodes[id.0].root = Some(RootLink { link_id, link_addr });
                self.roots.push(id);
                Ok(())
            }
        }
    }

    /// Record that `child_nonce` is a child of `parent_nonce`.
    pub fn set_relationship(&mut self, parent_nonce: u32, child_nonce: u32) -> Result<(), TreeError> {
        if parent_nonce == child_nonce {
            return Err(TreeError::inconsistent(format!(
                "node {:#010x} reported as its own parent",
                child_nonce
            )));
        }

        let existing_parent = self.id_by_nonce(parent_nonce);
        let existing_child = self.id_by_nonce(child_nonce);

        if let (Some(parent), Some(child)) = (existing_parent, existing_child) {
            if self.nodes[child.0].parent == Some(parent) {
                return Ok(());
            }
        }
        if self.finalized {
            let nonce = if existing_parent.is_none() {
                parent_nonce
            } else {
                child_nonce
            };
            return Err(TreeError::AlreadyFinalized { nonce });
        }

        if let Some(child) = existing_child {
            let node = &self.nodes[child.0];
            if node.is_root() {
                return Err(TreeError::inconsistent(format!(
                    "root {:#010x} reported as child of {:#010x}",
                    child_nonce, parent_nonce
                )));
            }
            if let Some(other) = node.parent {
                return Err(TreeError::inconsistent(format!(
                    "node {:#010x} has parents {:#010x} and {:#010x}",
                    child_nonce, self.nodes[other.0].nonce, parent_nonce
                )));
            }
            if let Some(parent) = existing_parent {
                if self.is_ancestor(child, parent) {
                    return Err(TreeError::inconsistent(format!(
                        "edge {:#010x} -> {:#010x} closes a cycle",
                        parent_nonce, child_nonce
                    )));
                }
            }
        }

        let parent = existing_parent.unwrap_or_else(|| self.insert(parent_nonce));
        let child = existing_child.unwrap_or_else(|| self.insert(child_nonce));
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    /// Calculate mesh addresses and freeze the structure.
    ///
    /// Returns the number of addressed nodes. Calling it again is a no-op.
    pub fn finalize_addresses(&mut self) -> Result<usize, TreeError> {
        if self.finalized {
            return Ok(self.by_address.len());
        }

        let reachable = self.preorder().len();
        if reachable > ADDRESS_SPACE {
            return Err(TreeError::AddressSpaceExhausted {
                nodes: reachable,
                max: ADDRESS_SPACE,
            });
        }

        let mut next = 0usize;
        for root in self.roots.clone() {
            self.assign_range(root, &mut next);
        }
        self.finalized = true;
        Ok(self.by_address.len())
    }

    /// Assigns `next` to `id` and its subtree; returns the subtree's last address.
    fn assign_range(&mut self, id: NodeId, next: &mut usize) -> u8 {
        // Fits: the reachable count was checked against ADDRESS_SPACE.
        let address = *next as u8;
        *next += 1;
        self.nodes[id.0].address = Some(address);
        self.by_address.insert(address, id);

        let mut last = address;
        for child in self.nodes[id.0].children.clone() {
            last = self.assign_range(child, next);
        }
        self.nodes[id.0].max_route = Some(last);
        last
    }

    /// First node (pre-order, roots first) that is unassigned and has been
    /// sent fewer than `min_retransmit_count` AssignAddress packets.
    pub fn next_unassigned(&self, min_retransmit_count: u32) -> Option<NodeId> {
        self.preorder().into_iter().find(|&id| {
            let node = &self.nodes[id.0];
            !node.assigned && node.assign_sent < min_retransmit_count
        })
    }

    /// Root whose address range contains `address`.
    pub fn route_for(&self, address: u8) -> Option<&Node> {
        self.roots().find(|root| root.covers(address))
    }

    /// Mark a node as having confirmed its address.
    ///
    /// Returns `true` on the first transition.
    pub fn mark_assigned(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id.0];
        !std::mem::replace(&mut node.assigned, true)
    }

    /// Count one AssignAddress transmission.
    pub fn record_assign_sent(&mut self, id: NodeId) {
        self.nodes[id.0].assign_sent += 1;
    }

    /// Attach the node's RPC dispatcher.
    pub fn attach_dispatcher(&mut self, id: NodeId, dispatcher: Arc<RpcDispatcher>) {
        self.nodes[id.0].dispatcher = Some(dispatcher);
    }

    /// Number of addressed nodes that confirmed their address.
    pub fn assigned_count(&self) -> usize {
        self.by_address
            .values()
            .filter(|id| self.nodes[id.0].assigned)
            .count()
    }

    /// Record a structural violation seen while the tree is being built.
    ///
    /// Only the first one is kept.
    pub fn record_fault(&mut self, err: TreeError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    /// The recorded violation, if any.
    pub fn fault(&self) -> Option<&TreeError> {
        self.fault.as_ref()
    }

    /// Reachable nodes in pre-order, roots first.
    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    fn depth(&self, mut id: NodeId) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nodes[id.0].parent {
            depth += 1;
            id = parent;
        }
        depth
    }

    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes[id.0].parent {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn insert(&mut self, nonce: u32) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(nonce));
        self.by_nonce.insert(nonce, id);
        id
    }

    /// Summaries of the reachable nodes in pre-order.
    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.preorder()
            .into_iter()
            .map(|id| {
                let node = &self.nodes[id.0];
                NodeSummary {
                    nonce: node.nonce,
                    parent_nonce: node.parent.map(|p| self.nodes[p.0].nonce),
                    depth: self.depth(id),
                    root: node.root,
                    address: node.address,
                    max_route: node.max_route,
                    assigned: node.assigned,
                    assign_sent: node.assign_sent,
                    device_id: node
                        .dispatcher
                        .as_ref()
                        .and_then(|d| d.device())
                        .map(|d| d.unique_id()),
                }
            })
            .collect()
    }
}
