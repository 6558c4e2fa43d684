use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::bytes::Bytes;
use crate::consts::{MAX_PACKET_BYTES, SOCKET_RECV_BUF_SIZE, SOCKET_SEND_BUF_SIZE};
use crate::crypto::Key;
use crate::error::SocketError;
use crate::packet::Packet;
use crate::transport::{EncryptionMappings, Transport};

/// Nonblocking UDP transport framing packets with the crate's wire codec.
pub struct DoormanSocket {
    socket: UdpSocket,
    mappings: EncryptionMappings,
}

impl DoormanSocket {
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self, SocketError> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(DoormanSocket {
            socket: socket.into(),
            mappings: EncryptionMappings::default(),
        })
    }
}

impl Transport for DoormanSocket {
    type Error = SocketError;

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("address should be bound")
    }

    fn receive_packet(&mut self) -> Result<Option<(Packet, SocketAddr)>, SocketError> {
        let mut buf = [0u8; MAX_PACKET_BYTES];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if len > 0 => (len, from),
                Ok(_) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(SocketError::from(e)),
            };
            let mut cursor = io::Cursor::new(&buf[..len]);
            match Packet::read(&mut cursor) {
                Ok(packet) => return Ok(Some((packet, from))),
                Err(e) => {
                    log::trace!("dropping malformed packet from {from}: {e}");
                    continue;
                }
            }
        }
    }

    fn send_packet(&mut self, to: SocketAddr, packet: Packet) -> Result<(), SocketError> {
        let mut buf = [0u8; MAX_PACKET_BYTES];
        let mut cursor = io::Cursor::new(&mut buf[..]);
        packet
            .write(&mut cursor)
            .map_err(SocketError::from)?;
        let len = cursor.position() as usize;
        match self.socket.send_to(&buf[..len], to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(SocketError::from(e)),
        }
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

    fn write_packets(&mut self, _now: f64) {
        // datagrams go out on send, nothing is queued
    }
}
