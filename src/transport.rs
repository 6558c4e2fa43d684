use std::{cell::RefCell, net::SocketAddr, rc::Rc};

use crate::{
    consts::MAX_ENCRYPTION_MAPPINGS, crypto::Key, error::DoormanError, packet::Packet,
};

/// Datagram transport consumed by [`Server`](crate::server::Server) and
/// [`Client`](crate::client::Client).
///
/// `receive_packet` must be non-blocking; `send_packet` is best-effort. The
/// transport owns the per-address encryption mappings for the post-handshake
/// channel; the core only installs and resets them.
pub trait Transport {
    type Error: Into<DoormanError>;
    fn addr(&self) -> SocketAddr;
    fn receive_packet(&mut self) -> Result<Option<(Packet, SocketAddr)>, Self::Error>;
    fn send_packet(&mut self, to: SocketAddr, packet: Packet) -> Result<(), Self::Error>;
    fn add_encryption_mapping(&mut self, address: SocketAddr, receive_key: Key, send_key: Key)
        -> bool;
    fn reset_encryption_mappings(&mut self);
    fn write_packets(&mut self, now: f64);
}

impl<T> Transport for Rc<RefCell<T>>
where
    T: Transport,
{
    type Error = T::Error;
    fn addr(&self) -> SocketAddr {
        self.borrow().addr()
    }
    fn receive_packet(&mut self) -> Result<Option<(Packet, SocketAddr)>, Self::Error> {
        self.borrow_mut().receive_packet()
    }
    fn send_packet(&mut self, to: SocketAddr, packet: Packet) -> Result<(), Self::Error> {
        self.borrow_mut().send_packet(to, packet)
    }
    fn add_encryption_mapping(
        &mut self,
        address: SocketAddr,
        receive_key: Key,
        send_key: Key,
    ) -> bool {
        self.borrow_mut()
            .add_encryption_mapping(address, receive_key, send_key)
    }
    fn reset_encryption_mappings(&mut self) {
        self.borrow_mut().reset_encryption_mappings()
    }
    fn write_packets(&mut self, now: f64) {
        self.borrow_mut().write_packets(now)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncryptionMapping {
    pub address: SocketAddr,
    pub receive_key: Key,
    pub send_key: Key,
}

/// Bounded per-address key table shared by the transport implementations.
#[derive(Debug, Default)]
pub struct EncryptionMappings {
    entries: Vec<EncryptionMapping>,
}

impl EncryptionMappings {
    pub fn add(&mut self, address: SocketAddr, receive_key: Key, send_key: Key) -> bool {
        let mapping = EncryptionMapping {
            address,
            receive_key,
            send_key,
        };
        if let Some(existing) = self.entries.iter_mut().find(|m| m.address == address) {
            *existing = mapping;
            return true;
        }
        if self.entries.len() >= MAX_ENCRYPTION_MAPPINGS {
            return false;
        }
        self.entries.push(mapping);
        true
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn find(&self, address: SocketAddr) -> Option<&EncryptionMapping> {
        self.entries.iter().find(|m| m.address == address)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[test]
fn mappings_replace_existing_address_and_bound_capacity() {
    let mut mappings = EncryptionMappings::default();
    let addr = SocketAddr::from(([127, 0, 0, 1], 40000));

    assert!(mappings.add(addr, [1; 32], [2; 32]));
    assert!(mappings.add(addr, [3; 32], [4; 32]));
    assert_eq!(mappings.find(addr).unwrap().receive_key, [3; 32]);

    for i in 1..MAX_ENCRYPTION_MAPPINGS as u16 {
        assert!(mappings.add(SocketAddr::from(([127, 0, 0, 1], 40000 + i)), [0; 32], [0; 32]));
    }
    assert!(!mappings.add(SocketAddr::from(([127, 0, 0, 1], 2)), [0; 32], [0; 32]));

    mappings.reset();
    assert!(mappings.is_empty());
}
