use std::net::SocketAddr;

use crate::{
    consts::{
        CONNECTION_CONFIRM_SEND_RATE, CONNECTION_HEART_BEAT_RATE, CONNECTION_TIME_OUT, MAC_BYTES,
        MAX_CLIENTS,
    },
    crypto::Key,
    error::DoormanError,
    packet::{
        ConnectionChallengePacket, ConnectionRequestPacket, ConnectionResponsePacket, Packet,
    },
    replay::ConnectTokenCache,
    time,
    token::{ChallengeToken, ConnectToken},
    transport::Transport,
};

type Result<T> = std::result::Result<T, DoormanError>;

type Callback<Ctx> = Box<dyn FnMut(usize, Option<&mut Ctx>) + Send + Sync + 'static>;

pub struct ServerConfig<Ctx> {
    ctx: Option<Box<Ctx>>,
    on_connect: Option<Callback<Ctx>>,
    on_disconnect: Option<Callback<Ctx>>,
    on_timed_out: Option<Callback<Ctx>>,
}

impl<Ctx> Default for ServerConfig<Ctx> {
    fn default() -> Self {
        Self {
            ctx: None,
            on_connect: None,
            on_disconnect: None,
            on_timed_out: None,
        }
    }
}

impl<Ctx> ServerConfig<Ctx> {
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            ctx: Some(Box::new(ctx)),
            ..Default::default()
        }
    }

    pub fn on_connect(
        mut self,
        callback: impl FnMut(usize, Option<&mut Ctx>) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Box::new(callback));
        self
    }

    pub fn on_disconnect(
        mut self,
        callback: impl FnMut(usize, Option<&mut Ctx>) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    pub fn on_timed_out(
        mut self,
        callback: impl FnMut(usize, Option<&mut Ctx>) + Send + Sync + 'static,
    ) -> Self {
        self.on_timed_out = Some(Box::new(callback));
        self
    }

    fn fire_on_connect(&mut self, slot: usize) {
        if let Some(ref mut cb) = self.on_connect {
            cb(slot, self.ctx.as_mut().map(|ctx| ctx.as_mut()))
        }
    }

    fn fire_on_disconnect(&mut self, slot: usize) {
        if let Some(ref mut cb) = self.on_disconnect {
            cb(slot, self.ctx.as_mut().map(|ctx| ctx.as_mut()))
        }
    }

    fn fire_on_timed_out(&mut self, slot: usize) {
        if let Some(ref mut cb) = self.on_timed_out {
            cb(slot, self.ctx.as_mut().map(|ctx| ctx.as_mut()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClientSlot {
    connected: bool,
    client_id: u64,
    address: Option<SocketAddr>,
    connect_time: f64,
    last_packet_send_time: f64,
    last_packet_receive_time: f64,
}

impl ClientSlot {
    const EMPTY: Self = Self {
        connected: false,
        client_id: 0,
        address: None,
        connect_time: 0.0,
        last_packet_send_time: 0.0,
        last_packet_receive_time: 0.0,
    };
}

pub struct Server<T: Transport, Ctx = ()> {
    transport: T,
    protocol_id: u32,
    private_key: Key,
    challenge_token_nonce: u64,
    num_connected_clients: usize,
    slots: [ClientSlot; MAX_CLIENTS],
    connect_token_entries: ConnectTokenCache,
    wall_clock: fn() -> u64,
    cfg: ServerConfig<Ctx>,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, protocol_id: u32, private_key: Key) -> Self {
        Self::with_config(transport, protocol_id, private_key, ServerConfig::default())
    }
}

impl<T: Transport, Ctx> Server<T, Ctx> {
    pub fn with_config(
        transport: T,
        protocol_id: u32,
        private_key: Key,
        cfg: ServerConfig<Ctx>,
    ) -> Self {
        log::info!("server started on {}", transport.addr());
        Self {
            transport,
            protocol_id,
            private_key,
            challenge_token_nonce: 0,
            num_connected_clients: 0,
            slots: [ClientSlot::EMPTY; MAX_CLIENTS],
            connect_token_entries: ConnectTokenCache::new(),
            wall_clock: time::wall_clock_secs,
            cfg,
        }
    }

    pub fn num_connected_clients(&self) -> usize {
        self.num_connected_clients
    }

    pub fn is_client_connected(&self, slot: usize) -> bool {
        self.slots[slot].connected
    }

    /// The identity in `slot`, 0 when the slot is free.
    pub fn client_id(&self, slot: usize) -> u64 {
        self.slots[slot].client_id
    }

    pub fn client_address(&self, slot: usize) -> Option<SocketAddr> {
        self.slots[slot].address
    }

    /// When the session in `slot` was established, 0.0 when the slot is free.
    pub fn client_connect_time(&self, slot: usize) -> f64 {
        self.slots[slot].connect_time
    }

    pub fn is_connected(&self, client_id: u64) -> bool {
        self.slots
            .iter()
            .any(|s| s.connected && s.client_id == client_id)
    }

    pub fn is_connected_with_address(&self, address: SocketAddr, client_id: u64) -> bool {
        self.find_slot_with_id(address, client_id).is_some()
    }

    pub fn update(&mut self, now: f64) -> Result<()> {
        self.receive_packets(now)?;
        self.send_packets(now)?;
        self.check_for_timeout(now);
        Ok(())
    }

    pub fn send_packets(&mut self, now: f64) -> Result<()> {
        for slot in 0..MAX_CLIENTS {
            if !self.slots[slot].connected {
                continue;
            }
            if self.slots[slot].last_packet_send_time + CONNECTION_HEART_BEAT_RATE > now {
                continue;
            }
            log::trace!("server sending heartbeat to slot {slot}");
            self.send_to_client(slot, Packet::ConnectionHeartBeat, now)?;
        }
        Ok(())
    }

    pub fn receive_packets(&mut self, now: f64) -> Result<()> {
        while let Some((packet, from)) = self.transport.receive_packet().map_err(Into::into)? {
            match packet {
                Packet::ConnectionRequest(pkt) => {
                    self.process_connection_request(pkt, from, now)?
                }
                Packet::ConnectionResponse(pkt) => {
                    self.process_connection_response(pkt, from, now)?
                }
                Packet::ConnectionHeartBeat => self.process_connection_heart_beat(from, now),
                Packet::ConnectionDisconnect => self.process_connection_disconnect(from, now),
                Packet::ConnectionDenied | Packet::ConnectionChallenge(_) => {}
            }
        }
        Ok(())
    }

    pub fn check_for_timeout(&mut self, now: f64) {
        for slot in 0..MAX_CLIENTS {
            if !self.slots[slot].connected {
                continue;
            }
            if self.slots[slot].last_packet_receive_time + CONNECTION_TIME_OUT < now {
                log::info!(
                    "client {:x} in slot {slot} timed out",
                    self.slots[slot].client_id
                );
                self.cfg.fire_on_timed_out(slot);
                self.disconnect_client(slot, now);
            }
        }
    }

    pub fn disconnect_client(&mut self, slot: usize, now: f64) {
        if !self.slots[slot].connected {
            return;
        }
        self.cfg.fire_on_disconnect(slot);
        log::info!(
            "server disconnected client {:x} in slot {slot}",
            self.slots[slot].client_id
        );
        if let Err(err) = self.send_to_client(slot, Packet::ConnectionDisconnect, now) {
            log::debug!("failed to send disconnect packet: {err}");
        }
        self.slots[slot] = ClientSlot::EMPTY;
        self.num_connected_clients -= 1;
    }

    fn process_connection_request(
        &mut self,
        packet: ConnectionRequestPacket,
        from: SocketAddr,
        now: f64,
    ) -> Result<()> {
        let server_address = self.transport.addr();

        let mut token_data = packet.connect_token_data;
        let Ok(token) =
            ConnectToken::decrypt(&mut token_data, packet.connect_token_nonce, &self.private_key)
        else {
            log::debug!("failed to decrypt connect token from {from}");
            return Ok(());
        };

        if token.protocol_id != self.protocol_id {
            log::debug!("connect token protocol id mismatch");
            return Ok(());
        }

        if !token.server_addresses.contains(server_address) {
            log::debug!("server address is not in connect token whitelist");
            return Ok(());
        }

        if token.client_id == 0 {
            log::debug!("connect token client id is zero");
            return Ok(());
        }

        if self.is_connected_with_address(from, token.client_id) {
            log::debug!("client {:x} is already connected", token.client_id);
            return Ok(());
        }

        if token.expiry_timestamp <= (self.wall_clock)() {
            log::debug!("connect token has expired");
            return Ok(());
        }

        if !self.transport.add_encryption_mapping(
            from,
            token.client_to_server_key,
            token.server_to_client_key,
        ) {
            log::debug!("failed to add encryption mapping for {from}");
            return Ok(());
        }

        // a full server must not consume a replay-cache seat
        if self.num_connected_clients == MAX_CLIENTS {
            log::debug!("connection denied: server is full");
            self.transport
                .send_packet(from, Packet::ConnectionDenied)
                .map_err(Into::into)?;
            return Ok(());
        }

        let mut mac = [0u8; MAC_BYTES];
        mac.copy_from_slice(&packet.connect_token_data[..MAC_BYTES]);
        if !self.connect_token_entries.find_or_add(from, &mac, now) {
            log::debug!("connect token has already been used");
            return Ok(());
        }

        let Ok(challenge) = ChallengeToken::generate(&token, from, server_address, mac) else {
            log::debug!("failed to generate challenge token");
            return Ok(());
        };

        let challenge_token_nonce = self.challenge_token_nonce;
        let Ok(challenge_token_data) = challenge.encrypt(challenge_token_nonce, &self.private_key)
        else {
            log::debug!("failed to encrypt challenge token");
            return Ok(());
        };
        self.challenge_token_nonce += 1;

        log::debug!("server sent challenge to client {from}");
        self.transport
            .send_packet(
                from,
                Packet::ConnectionChallenge(ConnectionChallengePacket {
                    challenge_token_data,
                    challenge_token_nonce,
                }),
            )
            .map_err(Into::into)?;
        Ok(())
    }

    fn process_connection_response(
        &mut self,
        packet: ConnectionResponsePacket,
        from: SocketAddr,
        now: f64,
    ) -> Result<()> {
        let mut token_data = packet.challenge_token_data;
        let Ok(challenge) = ChallengeToken::decrypt(
            &mut token_data,
            packet.challenge_token_nonce,
            &self.private_key,
        ) else {
            log::debug!("failed to decrypt challenge token from {from}");
            return Ok(());
        };

        if challenge.client_address != from {
            log::debug!("challenge token client address does not match");
            return Ok(());
        }

        if challenge.server_address != self.transport.addr() {
            log::debug!("challenge token server address does not match");
            return Ok(());
        }

        // a retransmit of a response we already honored earns at most one extra
        // heartbeat per confirm window
        if let Some(slot) = self.find_slot_with_id(from, challenge.client_id) {
            if self.slots[slot].last_packet_send_time + CONNECTION_CONFIRM_SEND_RATE < now {
                self.send_to_client(slot, Packet::ConnectionHeartBeat, now)?;
            }
            return Ok(());
        }

        log::debug!(
            "processing connection response from {from} (client id = {:x})",
            challenge.client_id
        );

        if self.num_connected_clients == MAX_CLIENTS {
            log::debug!("connection denied: server is full");
            self.transport
                .send_packet(from, Packet::ConnectionDenied)
                .map_err(Into::into)?;
            return Ok(());
        }

        let Some(slot) = self.find_free_slot() else {
            return Ok(());
        };
        self.connect_client(slot, &challenge, now)
    }

    fn process_connection_heart_beat(&mut self, from: SocketAddr, now: f64) {
        if let Some(slot) = self.find_slot_with_address(from) {
            self.slots[slot].last_packet_receive_time = now;
        }
    }

    fn process_connection_disconnect(&mut self, from: SocketAddr, now: f64) {
        if let Some(slot) = self.find_slot_with_address(from) {
            log::debug!("server received disconnect packet from {from}");
            self.disconnect_client(slot, now);
        }
    }

    fn connect_client(&mut self, slot: usize, challenge: &ChallengeToken, now: f64) -> Result<()> {
        self.num_connected_clients += 1;
        self.slots[slot] = ClientSlot {
            connected: true,
            client_id: challenge.client_id,
            address: Some(challenge.client_address),
            connect_time: now,
            last_packet_send_time: now,
            last_packet_receive_time: now,
        };
        log::info!(
            "client {:x} connected in slot {slot}",
            challenge.client_id
        );
        self.cfg.fire_on_connect(slot);
        // seed the client's liveness timer right away
        self.send_to_client(slot, Packet::ConnectionHeartBeat, now)
    }

    fn send_to_client(&mut self, slot: usize, packet: Packet, now: f64) -> Result<()> {
        let Some(address) = self.slots[slot].address else {
            return Ok(());
        };
        self.slots[slot].last_packet_send_time = now;
        self.transport
            .send_packet(address, packet)
            .map_err(Into::into)
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.connected)
    }

    fn find_slot_with_address(&self, address: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.connected && s.address == Some(address))
    }

    fn find_slot_with_id(&self, address: SocketAddr, client_id: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.connected && s.address == Some(address) && s.client_id == client_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;
    use crate::{
        client::{Client, ClientState},
        crypto,
        simulator::{NetworkSimulator, SimulatorEndpoint},
    };

    const PROTOCOL_ID: u32 = 0x11223344;
    const SERVER_ADDR: &str = "127.0.0.1:40000";

    type SimServer<Ctx = ()> = Server<Rc<RefCell<SimulatorEndpoint>>, Ctx>;
    type SimClient = Client<Rc<RefCell<SimulatorEndpoint>>>;

    struct Net {
        simulator: Rc<RefCell<NetworkSimulator>>,
        server_addr: SocketAddr,
        private_key: Key,
    }

    fn net() -> Net {
        Net {
            simulator: Rc::new(RefCell::new(NetworkSimulator::default())),
            server_addr: SERVER_ADDR.parse().unwrap(),
            private_key: crypto::generate_key().unwrap(),
        }
    }

    fn endpoint(net: &Net, addr: SocketAddr) -> Rc<RefCell<SimulatorEndpoint>> {
        Rc::new(RefCell::new(SimulatorEndpoint::new(
            Rc::clone(&net.simulator),
            addr,
        )))
    }

    fn server(net: &Net) -> SimServer {
        Server::new(endpoint(net, net.server_addr), PROTOCOL_ID, net.private_key)
    }

    fn server_with_config<Ctx>(net: &Net, cfg: ServerConfig<Ctx>) -> SimServer<Ctx> {
        Server::with_config(
            endpoint(net, net.server_addr),
            PROTOCOL_ID,
            net.private_key,
            cfg,
        )
    }

    fn issue_and_connect(
        net: &Net,
        port: u16,
        client_id: u64,
        nonce: u64,
        now: f64,
    ) -> (SimClient, SocketAddr) {
        let client_addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let mut client = Client::new(endpoint(net, client_addr));
        let token = ConnectToken::generate(client_id, net.server_addr, PROTOCOL_ID).unwrap();
        let token_data = token.encrypt(nonce, &net.private_key).unwrap();
        client
            .connect(
                net.server_addr,
                now,
                client_id,
                &token_data,
                nonce,
                &token.client_to_server_key,
                &token.server_to_client_key,
            )
            .unwrap();
        (client, client_addr)
    }

    fn complete_handshake<Ctx>(
        server: &mut SimServer<Ctx>,
        client: &mut SimClient,
        mut now: f64,
    ) -> f64 {
        for _ in 0..200 {
            client.update(now).unwrap();
            server.update(now).unwrap();
            if client.is_connected() {
                return now;
            }
            now += 0.05;
        }
        panic!("handshake did not complete");
    }

    fn heartbeats_to(net: &Net, addr: SocketAddr) -> usize {
        net.simulator
            .borrow()
            .pending(addr)
            .iter()
            .filter(|p| matches!(p, Packet::ConnectionHeartBeat))
            .count()
    }

    #[test]
    fn handshake_happy_path() {
        let net = net();
        let mut server = server(&net);
        let (mut client, client_addr) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);

        complete_handshake(&mut server, &mut client, 0.0);

        assert_eq!(server.num_connected_clients(), 1);
        assert!(server.is_client_connected(0));
        assert_eq!(server.client_id(0), 0x1111);
        assert_eq!(server.client_address(0), Some(client_addr));
        assert!(server.is_connected(0x1111));
        assert!(server.is_connected_with_address(client_addr, 0x1111));
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[test]
    fn replayed_request_from_other_address_is_rejected() {
        let net = net();
        let mut server = server(&net);
        let (mut client, _) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);

        // capture the request in flight before the server drains it
        client.update(0.0).unwrap();
        let request = net.simulator.borrow().pending(net.server_addr)[0].clone();
        let now = complete_handshake(&mut server, &mut client, 0.0);

        let attacker: SocketAddr = "127.0.0.1:60666".parse().unwrap();
        net.simulator
            .borrow_mut()
            .deliver(attacker, net.server_addr, request);
        server.receive_packets(now + 0.1).unwrap();

        assert_eq!(server.num_connected_clients(), 1);
        assert!(net.simulator.borrow().pending(attacker).is_empty());
    }

    #[test]
    fn replayed_request_from_same_address_still_gets_a_challenge() {
        let net = net();
        let mut server = server(&net);
        let (mut client, client_addr) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);

        client.update(0.0).unwrap();
        let request = net.simulator.borrow().pending(net.server_addr)[0].clone();
        server.update(0.0).unwrap();
        assert_eq!(net.simulator.borrow().pending(client_addr).len(), 1);

        net.simulator
            .borrow_mut()
            .deliver(client_addr, net.server_addr, request);
        server.receive_packets(0.05).unwrap();
        assert_eq!(net.simulator.borrow().pending(client_addr).len(), 2);
    }

    #[test]
    fn expired_token_is_rejected_at_the_boundary() {
        let net = net();
        let mut server = server(&net);
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let mut client = Client::new(endpoint(&net, client_addr));

        let mut token = ConnectToken::generate(0x1111, net.server_addr, PROTOCOL_ID).unwrap();
        token.expiry_timestamp = 100;
        let token_data = token.encrypt(1, &net.private_key).unwrap();
        client
            .connect(
                net.server_addr,
                0.0,
                0x1111,
                &token_data,
                1,
                &token.client_to_server_key,
                &token.server_to_client_key,
            )
            .unwrap();

        // expiry == wall clock is already expired
        server.wall_clock = || 100;
        client.update(0.0).unwrap();
        server.update(0.0).unwrap();
        assert_eq!(server.num_connected_clients(), 0);
        assert!(net.simulator.borrow().pending(client_addr).is_empty());

        // one second earlier the same token is still good
        server.wall_clock = || 99;
        client.update(0.15).unwrap();
        server.update(0.15).unwrap();
        assert!(matches!(
            net.simulator.borrow().pending(client_addr).first(),
            Some(Packet::ConnectionChallenge(_))
        ));
    }

    #[test]
    fn zero_client_id_is_rejected() {
        let net = net();
        let mut server = server(&net);
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let mut client = Client::new(endpoint(&net, client_addr));

        let token = ConnectToken::generate(0, net.server_addr, PROTOCOL_ID).unwrap();
        let token_data = token.encrypt(1, &net.private_key).unwrap();
        client
            .connect(
                net.server_addr,
                0.0,
                0,
                &token_data,
                1,
                &token.client_to_server_key,
                &token.server_to_client_key,
            )
            .unwrap();

        client.update(0.0).unwrap();
        server.update(0.0).unwrap();
        assert_eq!(server.num_connected_clients(), 0);
        assert!(net.simulator.borrow().pending(client_addr).is_empty());
    }

    #[test]
    fn token_for_another_server_is_rejected() {
        let net = net();
        let mut server = server(&net);
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let mut client = Client::new(endpoint(&net, client_addr));

        let other_server: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let token = ConnectToken::generate(0x1111, other_server, PROTOCOL_ID).unwrap();
        let token_data = token.encrypt(1, &net.private_key).unwrap();
        client
            .connect(
                net.server_addr,
                0.0,
                0x1111,
                &token_data,
                1,
                &token.client_to_server_key,
                &token.server_to_client_key,
            )
            .unwrap();

        client.update(0.0).unwrap();
        server.update(0.0).unwrap();
        assert_eq!(server.num_connected_clients(), 0);
        assert!(net.simulator.borrow().pending(client_addr).is_empty());
    }

    #[test]
    fn token_with_wrong_protocol_id_is_rejected() {
        let net = net();
        let mut server = server(&net);
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let mut client = Client::new(endpoint(&net, client_addr));

        let token = ConnectToken::generate(0x1111, net.server_addr, PROTOCOL_ID + 1).unwrap();
        let token_data = token.encrypt(1, &net.private_key).unwrap();
        client
            .connect(
                net.server_addr,
                0.0,
                0x1111,
                &token_data,
                1,
                &token.client_to_server_key,
                &token.server_to_client_key,
            )
            .unwrap();

        client.update(0.0).unwrap();
        server.update(0.0).unwrap();
        assert_eq!(server.num_connected_clients(), 0);
        assert!(net.simulator.borrow().pending(client_addr).is_empty());
    }

    #[test]
    fn full_server_denies_new_clients() {
        let net = net();
        let mut server = server(&net);

        let mut clients: Vec<SimClient> = (0..MAX_CLIENTS)
            .map(|i| issue_and_connect(&net, 50000 + i as u16, (i + 1) as u64, i as u64, 0.0).0)
            .collect();
        let mut now = 0.0;
        for _ in 0..200 {
            for client in &mut clients {
                client.update(now).unwrap();
            }
            server.update(now).unwrap();
            if clients.iter().all(|c| c.is_connected()) {
                break;
            }
            now += 0.05;
        }
        assert!(clients.iter().all(|c| c.is_connected()));
        assert_eq!(server.num_connected_clients(), MAX_CLIENTS);

        let (mut late_client, _) = issue_and_connect(&net, 59999, 0x9999, 0x9999, now);
        for _ in 0..50 {
            late_client.update(now).unwrap();
            server.update(now).unwrap();
            if late_client.state() == ClientState::ConnectionDenied {
                break;
            }
            now += 0.05;
        }
        assert_eq!(late_client.state(), ClientState::ConnectionDenied);
        assert_eq!(server.num_connected_clients(), MAX_CLIENTS);
    }

    #[test]
    fn retransmitted_response_earns_one_heartbeat_per_confirm_window() {
        let net = net();
        let mut server = server(&net);
        let (mut client, client_addr) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);

        client.update(0.0).unwrap(); // request out
        server.update(0.0).unwrap(); // challenge out
        client.update(0.05).unwrap(); // challenge in
        client.update(0.11).unwrap(); // response out
        let response = net
            .simulator
            .borrow()
            .pending(net.server_addr)
            .last()
            .cloned()
            .unwrap();
        assert!(matches!(response, Packet::ConnectionResponse(_)));
        server.update(0.12).unwrap(); // client connected, heartbeat out
        client.update(0.13).unwrap();
        assert!(client.is_connected());
        assert_eq!(heartbeats_to(&net, client_addr), 0);

        // duplicate inside the confirm window: silence
        net.simulator
            .borrow_mut()
            .deliver(client_addr, net.server_addr, response.clone());
        server.receive_packets(0.15).unwrap();
        assert_eq!(heartbeats_to(&net, client_addr), 0);
        assert_eq!(server.num_connected_clients(), 1);

        // duplicate after the window: exactly one heartbeat
        net.simulator
            .borrow_mut()
            .deliver(client_addr, net.server_addr, response);
        server.receive_packets(0.23).unwrap();
        assert_eq!(heartbeats_to(&net, client_addr), 1);
        assert_eq!(server.num_connected_clients(), 1);
    }

    #[test]
    fn response_with_mismatched_addresses_is_dropped() {
        let net = net();
        let mut server = server(&net);
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let token = ConnectToken::generate(0x1111, net.server_addr, PROTOCOL_ID).unwrap();

        // challenge bound to a different server address
        let other_server: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let challenge =
            ChallengeToken::generate(&token, client_addr, other_server, [0; MAC_BYTES]).unwrap();
        let challenge_token_data = challenge.encrypt(5, &net.private_key).unwrap();
        net.simulator.borrow_mut().deliver(
            client_addr,
            net.server_addr,
            Packet::ConnectionResponse(ConnectionResponsePacket {
                challenge_token_data,
                challenge_token_nonce: 5,
            }),
        );
        server.receive_packets(0.0).unwrap();
        assert_eq!(server.num_connected_clients(), 0);

        // challenge bound to the right server but echoed from a third party
        let attacker: SocketAddr = "127.0.0.1:60666".parse().unwrap();
        let challenge =
            ChallengeToken::generate(&token, client_addr, net.server_addr, [0; MAC_BYTES])
                .unwrap();
        let challenge_token_data = challenge.encrypt(6, &net.private_key).unwrap();
        net.simulator.borrow_mut().deliver(
            attacker,
            net.server_addr,
            Packet::ConnectionResponse(ConnectionResponsePacket {
                challenge_token_data,
                challenge_token_nonce: 6,
            }),
        );
        server.receive_packets(0.1).unwrap();
        assert_eq!(server.num_connected_clients(), 0);
    }

    #[test]
    fn each_challenge_carries_a_distinct_nonce() {
        let net = net();
        let mut server = server(&net);
        let (mut first, first_addr) = issue_and_connect(&net, 50000, 0x1, 1, 0.0);
        let (mut second, second_addr) = issue_and_connect(&net, 50001, 0x2, 2, 0.0);

        first.update(0.0).unwrap();
        second.update(0.0).unwrap();
        server.update(0.0).unwrap();

        let nonce_of = |addr| {
            let pending = net.simulator.borrow().pending(addr);
            let Some(Packet::ConnectionChallenge(pkt)) = pending.first().cloned() else {
                panic!("expected a challenge for {addr}");
            };
            pkt.challenge_token_nonce
        };
        assert_eq!(nonce_of(first_addr), 0);
        assert_eq!(nonce_of(second_addr), 1);
        assert_eq!(server.challenge_token_nonce, 2);
    }

    #[test]
    fn graceful_disconnect_frees_the_slot() {
        let net = net();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        let cfg = ServerConfig::<()>::default().on_disconnect(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut server = server_with_config(&net, cfg);
        let (mut client, _) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);
        let now = complete_handshake(&mut server, &mut client, 0.0);

        client.disconnect(now + 1.0).unwrap();
        server.receive_packets(now + 1.0).unwrap();

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(server.num_connected_clients(), 0);
        assert!(!server.is_client_connected(0));
        assert_eq!(server.client_id(0), 0);
        assert_eq!(server.client_address(0), None);
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn silent_client_times_out_once() {
        let net = net();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let timeout_counter = Arc::clone(&timeouts);
        let disconnect_counter = Arc::clone(&disconnects);
        let cfg = ServerConfig::<()>::default()
            .on_timed_out(move |_, _| {
                timeout_counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnect(move |_, _| {
                disconnect_counter.fetch_add(1, Ordering::SeqCst);
            });
        let mut server = server_with_config(&net, cfg);
        let (mut client, _) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);
        let now = complete_handshake(&mut server, &mut client, 0.0);

        // pin the slot's receive time with one explicit heartbeat exchange
        let now = now + 0.2;
        client.update(now).unwrap();
        server.receive_packets(now).unwrap();

        // same instant twice: no state change either time
        server.check_for_timeout(now + CONNECTION_TIME_OUT);
        server.check_for_timeout(now + CONNECTION_TIME_OUT);
        assert_eq!(server.num_connected_clients(), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);

        server.check_for_timeout(now + CONNECTION_TIME_OUT + 0.01);
        server.check_for_timeout(now + CONNECTION_TIME_OUT + 0.01);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(server.num_connected_clients(), 0);
    }

    #[test]
    fn heartbeats_keep_the_session_alive_both_ways() {
        let net = net();
        let mut server = server(&net);
        let (mut client, client_addr) = issue_and_connect(&net, 50000, 0x1111, 1, 0.0);
        let mut now = complete_handshake(&mut server, &mut client, 0.0);

        // run well past the timeout; the cadence loops keep both sides fresh
        let deadline = now + CONNECTION_TIME_OUT * 2.0;
        while now < deadline {
            client.update(now).unwrap();
            server.update(now).unwrap();
            now += 0.05;
        }
        assert!(client.is_connected());
        assert_eq!(server.num_connected_clients(), 1);
        assert!(server.is_connected_with_address(client_addr, 0x1111));
    }
}
