//! Shared harness: a controller wired to in-memory transports, plus helpers
//! that play the part of mesh devices.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use meshnet_base::{DeviceRegistry, LinkId, NetworkConfig, NetworkController, Transport};
use meshnet_frame::{encode_frame, FrameDecoder};
use meshnet_packet::{decode_packet, Packet};
use parking_lot::Mutex;

/// Our link address on every test link.
pub const BASE_LINK_ADDR: u8 = 10;

/// Records everything the controller writes.
#[derive(Default)]
pub struct MockTransport {
    written: Mutex<Vec<u8>>,
}

impl Transport for MockTransport {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }
}

impl MockTransport {
    /// Drain written bytes, returning `(dest_link_addr, packet)` for every
    /// frame a neighbor with `neighbor_addr` would accept.
    pub fn take_packets(&self, neighbor_addr: u8) -> Vec<(u8, Packet)> {
        let bytes = std::mem::take(&mut *self.written.lock());
        FrameDecoder::new(neighbor_addr)
            .push(&bytes)
            .into_iter()
            .filter_map(|frame| {
                decode_packet(&frame.payload)
                    .ok()
                    .map(|packet| (frame.dest_addr, packet))
            })
            .collect()
    }
}

/// An AssignAddress as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assign {
    pub dest_link_addr: u8,
    pub child_nonce: u32,
    pub address: u8,
    pub max_route: u8,
}

pub struct Harness {
    pub controller: NetworkController,
    pub registry: Arc<DeviceRegistry>,
    pub links: Vec<(LinkId, Arc<MockTransport>)>,
}

impl Harness {
    pub fn new(config: NetworkConfig, link_count: usize) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let controller = NetworkController::new(config, registry.clone());
        let links = (0..link_count)
            .map(|_| {
                let transport = Arc::new(MockTransport::default());
                let id = controller.attach_link(transport.clone(), BASE_LINK_ADDR);
                (id, transport)
            })
            .collect();
        Harness {
            controller,
            registry,
            links,
        }
    }

    pub fn network_key(&self) -> u16 {
        self.controller.config().network_key
    }

    /// Deliver `packet` on link `link` as if sent by neighbor `src_addr`.
    pub fn inject(&self, link: usize, src_addr: u8, packet: &Packet) {
        let bytes = encode_frame(src_addr, BASE_LINK_ADDR, &packet.encode()).unwrap();
        self.controller.on_bytes_received(self.links[link].0, &bytes);
    }

    /// Base nonce of the beacon sent on `link`.
    pub fn beacon_nonce(&self, link: usize) -> u32 {
        self.links[link]
            .1
            .take_packets(0)
            .into_iter()
            .find_map(|(dest, packet)| match packet {
                Packet::Beacon { base_nonce, .. } if dest == 0 => Some(base_nonce),
                _ => None,
            })
            .expect("no beacon on link")
    }

    /// A neighbor heard the beacon.
    pub fn child_response(&self, link: usize, src_addr: u8, nonce: u32, base_nonce: u32) {
        let packet = Packet::beacon_child_response(nonce, base_nonce, self.network_key());
        self.inject(link, src_addr, &packet);
    }

    /// A node reports a child, relayed by neighbor `src_addr`.
    pub fn parent_response(&self, link: usize, src_addr: u8, parent: u32, child: u32, base_nonce: u32) {
        let packet = Packet::beacon_parent_response(child, parent, base_nonce, self.network_key());
        self.inject(link, src_addr, &packet);
    }

    /// The node at `address` answers identify, relayed by neighbor `src_addr`.
    pub fn identify(&self, link: usize, src_addr: u8, address: u8, device_type: u32, unique_id: u32) {
        let mut data = vec![0, 45];
        data.extend_from_slice(&device_type.to_le_bytes());
        data.extend_from_slice(&unique_id.to_le_bytes());
        self.data_to_base(link, src_addr, address, data);
    }

    pub fn data_to_base(&self, link: usize, src_addr: u8, address: u8, data: Vec<u8>) {
        let packet = Packet::DataToBase {
            source_address: address,
            data,
        };
        self.inject(link, src_addr, &packet);
    }

    /// Drain packets written to `link` for `neighbor_addr`, returning the
    /// AssignAddress ones after checking their tags.
    pub fn assigns(&self, link: usize, neighbor_addr: u8, base_nonce: u32) -> Vec<Assign> {
        self.links[link]
            .1
            .take_packets(neighbor_addr)
            .into_iter()
            .filter_map(|(dest, packet)| {
                let Packet::AssignAddress {
                    child_nonce,
                    address,
                    max_route,
                    ..
                } = packet
                else {
                    return None;
                };
                assert!(packet.verify_hmac(base_nonce, self.network_key()).is_ok());
                Some(Assign {
                    dest_link_addr: dest,
                    child_nonce,
                    address,
                    max_route,
                })
            })
            .collect()
    }
}
