use std::{cell::RefCell, collections::VecDeque, convert::Infallible, net::SocketAddr, rc::Rc};

use crate::{
    crypto::Key,
    packet::Packet,
    transport::{EncryptionMappings, Transport},
};

#[derive(Debug)]
struct PacketEntry {
    from: SocketAddr,
    to: SocketAddr,
    packet: Packet,
}

/// In-memory packet bus shared by any number of [`SimulatorEndpoint`]s. Delivery
/// is immediate and lossless; tests drive ordering through the update cadence.
#[derive(Default)]
pub struct NetworkSimulator {
    entries: VecDeque<PacketEntry>,
}

impl NetworkSimulator {
    /// Injects a packet as if `from` had sent it, for replay and duplication tests.
    pub fn deliver(&mut self, from: SocketAddr, to: SocketAddr, packet: Packet) {
        self.entries.push_back(PacketEntry { from, to, packet });
    }

    /// Packets currently queued for `to`, oldest first.
    pub fn pending(&self, to: SocketAddr) -> Vec<Packet> {
        self.entries
            .iter()
            .filter(|e| e.to == to)
            .map(|e| e.packet.clone())
            .collect()
    }

    fn pop_for(&mut self, to: SocketAddr) -> Option<(Packet, SocketAddr)> {
        let index = self.entries.iter().position(|e| e.to == to)?;
        self.entries.remove(index).map(|e| (e.packet, e.from))
    }
}

pub struct SimulatorEndpoint {
    simulator: Rc<RefCell<NetworkSimulator>>,
    addr: SocketAddr,
    mappings: EncryptionMappings,
}

impl SimulatorEndpoint {
    pub fn new(simulator: Rc<RefCell<NetworkSimulator>>, addr: SocketAddr) -> Self {
        Self {
            simulator,
            addr,
            mappings: EncryptionMappings::default(),
        }
    }

    pub fn mappings(&self) -> &EncryptionMappings {
        &self.mappings
    }
}

impl Transport for SimulatorEndpoint {
    type Error = Infallible;

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn receive_packet(&mut self) -> Result<Option<(Packet, SocketAddr)>, Infallible> {
        Ok(self.simulator.borrow_mut().pop_for(self.addr))
    }

    fn send_packet(&mut self, to: SocketAddr, packet: Packet) -> Result<(), Infallible> {
        self.simulator.borrow_mut().deliver(self.addr, to, packet);
        Ok(())
    }

    fn add_encryption_mapping(
        &mut self,
        address: SocketAddr,
        receive_key: Key,
        send_key: Key,
    ) -> bool {
        self.mappings.add(address, receive_key, send_key)
    }

    fn reset_encryption_mappings(&mut self) {
        self.mappings.reset();
    }

    fn write_packets(&mut self, _now: f64) {}
}
