use std::net::SocketAddr;

use crate::{
    consts::{
        CHALLENGE_RESPONSE_TIME_OUT, CHALLENGE_TOKEN_BYTES, CONNECTION_HEART_BEAT_RATE,
        CONNECTION_REQUEST_SEND_RATE, CONNECTION_REQUEST_TIME_OUT, CONNECTION_RESPONSE_SEND_RATE,
        CONNECTION_TIME_OUT, CONNECT_TOKEN_BYTES,
    },
    crypto::Key,
    error::DoormanError,
    packet::{ConnectionRequestPacket, ConnectionResponsePacket, Packet},
    transport::Transport,
};

type Result<T> = std::result::Result<T, DoormanError>;

type Callback<Ctx> = Box<dyn FnMut(ClientState, Option<&mut Ctx>) + Send + Sync + 'static>;

pub struct ClientConfig<Ctx> {
    ctx: Option<Box<Ctx>>,
    on_state_change: Option<Callback<Ctx>>,
}

impl<Ctx> Default for ClientConfig<Ctx> {
    fn default() -> Self {
        Self {
            ctx: None,
            on_state_change: None,
        }
    }
}

impl<Ctx> ClientConfig<Ctx> {
    pub fn with_context(ctx: Ctx) -> Self {
        Self {
            ctx: Some(Box::new(ctx)),
            on_state_change: None,
        }
    }

    pub fn on_state_change(
        mut self,
        callback: impl FnMut(ClientState, Option<&mut Ctx>) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(callback));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    ConnectionTimedOut,
    ConnectionRequestTimedOut,
    ChallengeResponseTimedOut,
    ConnectionDenied,
    Disconnected,
    SendingConnectionRequest,
    SendingChallengeResponse,
    Connected,
}

pub struct Client<T: Transport, Ctx = ()> {
    transport: T,
    state: ClientState,
    server_address: Option<SocketAddr>,
    client_id: u64,
    connect_token_data: [u8; CONNECT_TOKEN_BYTES],
    connect_token_nonce: u64,
    challenge_token_data: [u8; CHALLENGE_TOKEN_BYTES],
    challenge_token_nonce: u64,
    last_packet_send_time: f64,
    last_packet_receive_time: f64,
    cfg: ClientConfig<Ctx>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }
}

impl<T: Transport, Ctx> Client<T, Ctx> {
    pub fn with_config(transport: T, cfg: ClientConfig<Ctx>) -> Self {
        Self {
            transport,
            state: ClientState::Disconnected,
            server_address: None,
            client_id: 0,
            connect_token_data: [0; CONNECT_TOKEN_BYTES],
            connect_token_nonce: 0,
            challenge_token_data: [0; CHALLENGE_TOKEN_BYTES],
            challenge_token_nonce: 0,
            last_packet_send_time: f64::NEG_INFINITY,
            last_packet_receive_time: f64::NEG_INFINITY,
            cfg,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Arms the handshake with token material delivered out-of-band by the issuer.
    /// Any previous session is torn down first.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &mut self,
        server_address: SocketAddr,
        now: f64,
        client_id: u64,
        connect_token_data: &[u8; CONNECT_TOKEN_BYTES],
        connect_token_nonce: u64,
        client_to_server_key: &Key,
        server_to_client_key: &Key,
    ) -> Result<()> {
        self.disconnect(now)?;
        if !self.transport.add_encryption_mapping(
            server_address,
            *server_to_client_key,
            *client_to_server_key,
        ) {
            return Err(DoormanError::EncryptionMapping);
        }
        self.server_address = Some(server_address);
        self.client_id = client_id;
        self.connect_token_data = *connect_token_data;
        self.connect_token_nonce = connect_token_nonce;
        self.last_packet_send_time = now - 1.0; // force a packet to be sent immediately
        self.last_packet_receive_time = now;
        self.set_state(ClientState::SendingConnectionRequest);
        log::info!(
            "client connecting to server {server_address} (client id = {:x})",
            client_id
        );
        Ok(())
    }

    /// Tears the session down. While connected, one best-effort disconnect packet
    /// goes out and is flushed before the encryption mappings are reset.
    pub fn disconnect(&mut self, now: f64) -> Result<()> {
        if self.state == ClientState::Connected {
            log::info!("client-side disconnect (client id = {:x})", self.client_id);
            self.send_to_server(Packet::ConnectionDisconnect, now)?;
            self.transport.write_packets(now);
        }
        self.reset_connection_data();
        Ok(())
    }

    pub fn update(&mut self, now: f64) -> Result<()> {
        self.receive_packets(now)?;
        self.send_packets(now)?;
        self.check_for_timeout(now)?;
        Ok(())
    }

    pub fn send_packets(&mut self, now: f64) -> Result<()> {
        match self.state {
            ClientState::SendingConnectionRequest => {
                if self.last_packet_send_time + CONNECTION_REQUEST_SEND_RATE > now {
                    return Ok(());
                }
                log::debug!("client sending connection request to server");
                self.send_to_server(
                    Packet::ConnectionRequest(ConnectionRequestPacket {
                        connect_token_data: self.connect_token_data,
                        connect_token_nonce: self.connect_token_nonce,
                    }),
                    now,
                )
            }
            ClientState::SendingChallengeResponse => {
                if self.last_packet_send_time + CONNECTION_RESPONSE_SEND_RATE > now {
                    return Ok(());
                }
                log::debug!("client sending challenge response to server");
                self.send_to_server(
                    Packet::ConnectionResponse(ConnectionResponsePacket {
                        challenge_token_data: self.challenge_token_data,
                        challenge_token_nonce: self.challenge_token_nonce,
                    }),
                    now,
                )
            }
            ClientState::Connected => {
                if self.last_packet_send_time + CONNECTION_HEART_BEAT_RATE > now {
                    return Ok(());
                }
                log::trace!("client sending heartbeat to server");
                self.send_to_server(Packet::ConnectionHeartBeat, now)
            }
            _ => Ok(()),
        }
    }

    pub fn receive_packets(&mut self, now: f64) -> Result<()> {
        while let Some((packet, from)) = self.transport.receive_packet().map_err(Into::into)? {
            if Some(from) != self.server_address {
                continue;
            }
            self.process_packet(packet, now)?;
        }
        Ok(())
    }

    pub fn check_for_timeout(&mut self, now: f64) -> Result<()> {
        match self.state {
            ClientState::SendingConnectionRequest
                if self.last_packet_receive_time + CONNECTION_REQUEST_TIME_OUT < now =>
            {
                log::info!("connection request to server timed out");
                self.set_state(ClientState::ConnectionRequestTimedOut);
            }
            ClientState::SendingChallengeResponse
                if self.last_packet_receive_time + CHALLENGE_RESPONSE_TIME_OUT < now =>
            {
                log::info!("challenge response to server timed out");
                self.set_state(ClientState::ChallengeResponseTimedOut);
            }
            ClientState::Connected
                if self.last_packet_receive_time + CONNECTION_TIME_OUT < now =>
            {
                log::info!("client connection timed out");
                self.set_state(ClientState::ConnectionTimedOut);
                self.disconnect(now)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn process_packet(&mut self, packet: Packet, now: f64) -> Result<()> {
        match (packet, self.state) {
            (Packet::ConnectionDenied, ClientState::SendingConnectionRequest) => {
                log::debug!("client received connection denied from server");
                self.set_state(ClientState::ConnectionDenied);
            }
            (Packet::ConnectionChallenge(pkt), ClientState::SendingConnectionRequest) => {
                log::debug!("client received connection challenge from server");
                self.challenge_token_data = pkt.challenge_token_data;
                self.challenge_token_nonce = pkt.challenge_token_nonce;
                self.set_state(ClientState::SendingChallengeResponse);
                self.last_packet_receive_time = now;
            }
            (Packet::ConnectionHeartBeat, ClientState::SendingChallengeResponse) => {
                log::info!("client is now connected to server");
                self.scrub_token_material();
                self.set_state(ClientState::Connected);
                self.last_packet_receive_time = now;
            }
            (Packet::ConnectionHeartBeat, ClientState::Connected) => {
                log::trace!("client received heartbeat from server");
                self.last_packet_receive_time = now;
            }
            (Packet::ConnectionDisconnect, ClientState::Connected) => {
                log::debug!("client received disconnect packet from server");
                self.disconnect(now)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn send_to_server(&mut self, packet: Packet, now: f64) -> Result<()> {
        let Some(server_address) = self.server_address else {
            return Ok(());
        };
        self.transport
            .send_packet(server_address, packet)
            .map_err(Into::into)?;
        self.last_packet_send_time = now;
        Ok(())
    }

    fn set_state(&mut self, state: ClientState) {
        log::debug!("client state changed from {:?} to {:?}", self.state, state);
        self.state = state;
        if let Some(ref mut cb) = self.cfg.on_state_change {
            cb(self.state, self.cfg.ctx.as_mut().map(|ctx| ctx.as_mut()))
        }
    }

    fn scrub_token_material(&mut self) {
        self.connect_token_data = [0; CONNECT_TOKEN_BYTES];
        self.connect_token_nonce = 0;
        self.challenge_token_data = [0; CHALLENGE_TOKEN_BYTES];
        self.challenge_token_nonce = 0;
    }

    fn reset_connection_data(&mut self) {
        self.server_address = None;
        self.client_id = 0;
        self.scrub_token_material();
        self.last_packet_send_time = f64::NEG_INFINITY;
        self.last_packet_receive_time = f64::NEG_INFINITY;
        if self.state != ClientState::Disconnected {
            self.set_state(ClientState::Disconnected);
        }
        self.transport.reset_encryption_mappings();
    }
}
