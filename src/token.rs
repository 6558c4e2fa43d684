use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::Bytes,
    consts::{
        AUTH_BYTES, CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_BYTES, CONNECT_TOKEN_EXPIRY_SECONDS,
        MAC_BYTES, MAX_SERVERS_PER_CONNECT_TOKEN,
    },
    crypto::{self, Key},
    error::DoormanError,
    time,
};

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddresses {
    len: u32,
    addrs: [Option<SocketAddr>; MAX_SERVERS_PER_CONNECT_TOKEN],
}

impl ServerAddresses {
    pub fn new(addrs: impl ToSocketAddrs) -> Result<Self, DoormanError> {
        let mut server_addresses = Self {
            addrs: [None; MAX_SERVERS_PER_CONNECT_TOKEN],
            len: 0,
        };

        for (i, addr) in addrs.to_socket_addrs()?.enumerate() {
            if i >= MAX_SERVERS_PER_CONNECT_TOKEN {
                return Err(DoormanError::TooManyServerAddresses(i + 1));
            }
            server_addresses.addrs[i] = Some(addr);
            server_addresses.len += 1;
        }

        if server_addresses.len == 0 {
            return Err(DoormanError::NoServerAddresses);
        }

        Ok(server_addresses)
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.iter().any(|a| a == addr)
    }

    pub fn iter(&self) -> ServerAddrsIter {
        ServerAddrsIter {
            addrs: &self.addrs,
            index: 0,
        }
    }
}

pub struct ServerAddrsIter<'a> {
    addrs: &'a [Option<SocketAddr>; MAX_SERVERS_PER_CONNECT_TOKEN],
    index: usize,
}

impl<'a> Iterator for ServerAddrsIter<'a> {
    type Item = SocketAddr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= MAX_SERVERS_PER_CONNECT_TOKEN {
            return None;
        }

        let addr = self.addrs[self.index];
        self.index += 1;
        addr
    }
}

impl Bytes for ServerAddresses {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.len())?;
        for addr in self.addrs.iter().flatten() {
            addr.write(writer)?;
        }
        Ok(())
    }

    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let len = reader.read_u32::<LittleEndian>()?;
        if len as usize > MAX_SERVERS_PER_CONNECT_TOKEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "too many server addresses",
            ));
        }
        let mut addrs = [None; MAX_SERVERS_PER_CONNECT_TOKEN];
        for slot in addrs.iter_mut().take(len as usize) {
            *slot = Some(SocketAddr::read(reader)?);
        }
        Ok(Self { len, addrs })
    }
}

/// Short-lived credential minted by an out-of-band issuer and presented by the
/// client to initiate a session. Only ever travels encrypted under the server's
/// private key.
pub struct ConnectToken {
    pub protocol_id: u32,
    pub client_id: u64,
    pub expiry_timestamp: u64,
    pub server_addresses: ServerAddresses,
    pub client_to_server_key: Key,
    pub server_to_client_key: Key,
    pub random: Key,
}

impl ConnectToken {
    pub fn generate(
        client_id: u64,
        server_addresses: impl ToSocketAddrs,
        protocol_id: u32,
    ) -> Result<Self, DoormanError> {
        Ok(Self {
            protocol_id,
            client_id,
            expiry_timestamp: time::wall_clock_secs() + CONNECT_TOKEN_EXPIRY_SECONDS,
            server_addresses: ServerAddresses::new(server_addresses)?,
            client_to_server_key: crypto::generate_key()?,
            server_to_client_key: crypto::generate_key()?,
            random: crypto::generate_key()?,
        })
    }

    pub fn encrypt(
        &self,
        nonce: u64,
        private_key: &Key,
    ) -> Result<[u8; CONNECT_TOKEN_BYTES], DoormanError> {
        let mut buf = [0u8; CONNECT_TOKEN_BYTES - AUTH_BYTES]; // zero padding up to the envelope size
        let mut cursor = io::Cursor::new(&mut buf[..]);
        self.write(&mut cursor)?;
        Ok(crypto::encrypt(&buf, None, nonce, private_key)?)
    }

    pub fn decrypt(
        encrypted: &mut [u8; CONNECT_TOKEN_BYTES],
        nonce: u64,
        private_key: &Key,
    ) -> Result<Self, DoormanError> {
        crypto::decrypt::<CONNECT_TOKEN_BYTES>(encrypted, None, nonce, private_key)?;
        let mut cursor = io::Cursor::new(&encrypted[..]);
        Ok(Self::read(&mut cursor)?)
    }
}

impl Bytes for ConnectToken {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.protocol_id)?;
        writer.write_u64::<LittleEndian>(self.client_id)?;
        writer.write_u64::<LittleEndian>(self.expiry_timestamp)?;
        self.server_addresses.write(writer)?;
        writer.write_all(&self.client_to_server_key)?;
        writer.write_all(&self.server_to_client_key)?;
        writer.write_all(&self.random)?;
        Ok(())
    }

    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let protocol_id = reader.read_u32::<LittleEndian>()?;
        let client_id = reader.read_u64::<LittleEndian>()?;
        let expiry_timestamp = reader.read_u64::<LittleEndian>()?;
        let server_addresses = ServerAddresses::read(reader)?;

        let mut client_to_server_key = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut client_to_server_key)?;

        let mut server_to_client_key = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut server_to_client_key)?;

        let mut random = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut random)?;

        Ok(Self {
            protocol_id,
            client_id,
            expiry_timestamp,
            server_addresses,
            client_to_server_key,
            server_to_client_key,
            random,
        })
    }
}

/// Server-minted credential echoed back by the client. Binds the handshake to the
/// requesting address and to one specific connect-token use.
pub struct ChallengeToken {
    pub client_id: u64,
    pub client_address: SocketAddr,
    pub server_address: SocketAddr,
    pub connect_token_mac: [u8; MAC_BYTES],
    pub client_to_server_key: Key,
    pub server_to_client_key: Key,
    pub random: Key,
}

impl ChallengeToken {
    pub fn generate(
        connect_token: &ConnectToken,
        client_address: SocketAddr,
        server_address: SocketAddr,
        connect_token_mac: [u8; MAC_BYTES],
    ) -> Result<Self, DoormanError> {
        if connect_token.client_id == 0 {
            return Err(DoormanError::InvalidClientId);
        }
        Ok(Self {
            client_id: connect_token.client_id,
            client_address,
            server_address,
            connect_token_mac,
            client_to_server_key: connect_token.client_to_server_key,
            server_to_client_key: connect_token.server_to_client_key,
            random: crypto::generate_key()?,
        })
    }

    pub fn encrypt(
        &self,
        nonce: u64,
        private_key: &Key,
    ) -> Result<[u8; CHALLENGE_TOKEN_BYTES], DoormanError> {
        let mut buf = [0u8; CHALLENGE_TOKEN_BYTES - AUTH_BYTES];
        let mut cursor = io::Cursor::new(&mut buf[..]);
        self.write(&mut cursor)?;
        Ok(crypto::encrypt(&buf, None, nonce, private_key)?)
    }

    pub fn decrypt(
        encrypted: &mut [u8; CHALLENGE_TOKEN_BYTES],
        nonce: u64,
        private_key: &Key,
    ) -> Result<Self, DoormanError> {
        crypto::decrypt::<CHALLENGE_TOKEN_BYTES>(encrypted, None, nonce, private_key)?;
        let mut cursor = io::Cursor::new(&encrypted[..]);
        Ok(Self::read(&mut cursor)?)
    }
}

impl Bytes for ChallengeToken {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u64::<LittleEndian>(self.client_id)?;
        self.client_address.write(writer)?;
        self.server_address.write(writer)?;
        writer.write_all(&self.connect_token_mac)?;
        writer.write_all(&self.client_to_server_key)?;
        writer.write_all(&self.server_to_client_key)?;
        writer.write_all(&self.random)?;
        Ok(())
    }

    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let client_id = reader.read_u64::<LittleEndian>()?;
        let client_address = SocketAddr::read(reader)?;
        let server_address = SocketAddr::read(reader)?;

        let mut connect_token_mac = [0; MAC_BYTES];
        reader.read_exact(&mut connect_token_mac)?;

        let mut client_to_server_key = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut client_to_server_key)?;

        let mut server_to_client_key = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut server_to_client_key)?;

        let mut random = [0; crate::consts::KEY_BYTES];
        reader.read_exact(&mut random)?;

        Ok(Self {
            client_id,
            client_address,
            server_address,
            connect_token_mac,
            client_to_server_key,
            server_to_client_key,
            random,
        })
    }
}

#[test]
fn encrypt_decrypt_connect_token() {
    let private_key = crypto::generate_key().unwrap();
    let nonce = 3;
    let token = ConnectToken::generate(
        0x1111,
        &[
            SocketAddr::from(([127, 0, 0, 1], 1)),
            SocketAddr::from(([127, 0, 0, 1], 2)),
            SocketAddr::from(([127, 0, 0, 1], 3)),
        ][..],
        0x11223344,
    )
    .unwrap();

    let mut encrypted = token.encrypt(nonce, &private_key).unwrap();
    let decrypted = ConnectToken::decrypt(&mut encrypted, nonce, &private_key).unwrap();

    assert_eq!(decrypted.protocol_id, token.protocol_id);
    assert_eq!(decrypted.client_id, token.client_id);
    assert_eq!(decrypted.expiry_timestamp, token.expiry_timestamp);
    assert_eq!(decrypted.server_addresses, token.server_addresses);
    assert_eq!(decrypted.client_to_server_key, token.client_to_server_key);
    assert_eq!(decrypted.server_to_client_key, token.server_to_client_key);
    assert_eq!(decrypted.random, token.random);
}

#[test]
fn encrypt_decrypt_challenge_token() {
    let private_key = crypto::generate_key().unwrap();
    let connect_token =
        ConnectToken::generate(0x2222, SocketAddr::from(([10, 0, 0, 1], 40000)), 7).unwrap();
    let client_address = SocketAddr::from(([192, 168, 1, 5], 55000));
    let server_address = SocketAddr::from(([10, 0, 0, 1], 40000));
    let mac = [0xcd; MAC_BYTES];

    let challenge =
        ChallengeToken::generate(&connect_token, client_address, server_address, mac).unwrap();
    let mut encrypted = challenge.encrypt(42, &private_key).unwrap();
    let decrypted = ChallengeToken::decrypt(&mut encrypted, 42, &private_key).unwrap();

    assert_eq!(decrypted.client_id, 0x2222);
    assert_eq!(decrypted.client_address, client_address);
    assert_eq!(decrypted.server_address, server_address);
    assert_eq!(decrypted.connect_token_mac, mac);
    assert_eq!(
        decrypted.client_to_server_key,
        connect_token.client_to_server_key
    );
    assert_eq!(
        decrypted.server_to_client_key,
        connect_token.server_to_client_key
    );
}

#[test]
fn challenge_token_rejects_zero_client_id() {
    let mut connect_token =
        ConnectToken::generate(0x3333, SocketAddr::from(([127, 0, 0, 1], 1)), 7).unwrap();
    connect_token.client_id = 0;
    let addr = SocketAddr::from(([127, 0, 0, 1], 2));
    assert!(matches!(
        ChallengeToken::generate(&connect_token, addr, addr, [0; MAC_BYTES]),
        Err(DoormanError::InvalidClientId)
    ));
}

#[test]
fn server_addresses_rejects_empty_and_overflow() {
    let empty: &[SocketAddr] = &[];
    assert!(matches!(
        ServerAddresses::new(empty),
        Err(DoormanError::NoServerAddresses)
    ));

    let addrs: Vec<SocketAddr> = (0..MAX_SERVERS_PER_CONNECT_TOKEN as u16 + 1)
        .map(|i| SocketAddr::from(([127, 0, 0, 1], 1000 + i)))
        .collect();
    assert!(matches!(
        ServerAddresses::new(&addrs[..]),
        Err(DoormanError::TooManyServerAddresses(_))
    ));
}
