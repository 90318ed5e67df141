//! Human-readable reports of the active tree.

use std::fmt::Write;
use std::sync::Arc;

use meshnet_base::{Device, NodeSummary};

/// One line per node, indented by depth.
///
/// ```text
/// [0..=1] 0x0000002a via link0/33 assigned device 0x0000aaaa
///   [1..=1] 0x0000002b assigned
/// ```
pub fn format_tree(nodes: &[NodeSummary]) -> String {
    let mut out = String::new();
    for node in nodes {
        let range = match (node.address, node.max_route) {
            (Some(start), Some(end)) => format!("[{}..={}]", start, end),
            _ => "[-]".to_string(),
        };
        let _ = write!(
            out,
            "{:indent$}{} {:#010x}",
            "",
            range,
            node.nonce,
            indent = node.depth * 2
        );
        if let Some(root) = node.root {
            let _ = write!(out, " via {}/{}", root.link_id, root.link_addr);
        }
        if node.assigned {
            out.push_str(" assigned");
        } else {
            let _ = write!(out, " unassigned ({} sent)", node.assign_sent);
        }
        if let Some(id) = node.device_id {
            let _ = write!(out, " device {:#010x}", id);
        }
        out.push('\n');
    }
    out
}

/// One line per known device.
pub fn format_devices(devices: &[Arc<Device>]) -> String {
    let mut out = String::new();
    for device in devices {
        let address = device
            .address()
            .map_or_else(|| "-".to_string(), |a| a.to_string());
        let _ = writeln!(
            out,
            "{:#010x} {:<9} type {:<6} address {}",
            device.unique_id(),
            device.kind(),
            device.device_type(),
            address
        );
    }
    out
}
