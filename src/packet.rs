use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::Bytes,
    consts::{CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_BYTES},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequestPacket {
    pub connect_token_data: [u8; CONNECT_TOKEN_BYTES],
    pub connect_token_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChallengePacket {
    pub challenge_token_data: [u8; CHALLENGE_TOKEN_BYTES],
    pub challenge_token_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResponsePacket {
    pub challenge_token_data: [u8; CHALLENGE_TOKEN_BYTES],
    pub challenge_token_nonce: u64,
}

/// The six packet kinds of the handshake and liveness protocol.
///
/// Token payloads ride inside the variants already encrypted; the wire codec
/// below frames them but never touches the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Packet {
    ConnectionRequest(ConnectionRequestPacket),
    ConnectionDenied,
    ConnectionChallenge(ConnectionChallengePacket),
    ConnectionResponse(ConnectionResponsePacket),
    ConnectionHeartBeat,
    ConnectionDisconnect,
}

impl Packet {
    const REQUEST: u8 = 1;
    const DENIED: u8 = 2;
    const CHALLENGE: u8 = 3;
    const RESPONSE: u8 = 4;
    const HEART_BEAT: u8 = 5;
    const DISCONNECT: u8 = 6;
}

impl Bytes for Packet {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        match self {
            Packet::ConnectionRequest(pkt) => {
                writer.write_u8(Self::REQUEST)?;
                writer.write_u64::<LittleEndian>(pkt.connect_token_nonce)?;
                writer.write_all(&pkt.connect_token_data)?;
            }
            Packet::ConnectionDenied => writer.write_u8(Self::DENIED)?,
            Packet::ConnectionChallenge(pkt) => {
                writer.write_u8(Self::CHALLENGE)?;
                writer.write_u64::<LittleEndian>(pkt.challenge_token_nonce)?;
                writer.write_all(&pkt.challenge_token_data)?;
            }
            Packet::ConnectionResponse(pkt) => {
                writer.write_u8(Self::RESPONSE)?;
                writer.write_u64::<LittleEndian>(pkt.challenge_token_nonce)?;
                writer.write_all(&pkt.challenge_token_data)?;
            }
            Packet::ConnectionHeartBeat => writer.write_u8(Self::HEART_BEAT)?,
            Packet::ConnectionDisconnect => writer.write_u8(Self::DISCONNECT)?,
        }
        Ok(())
    }

    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        match reader.read_u8()? {
            Self::REQUEST => {
                let connect_token_nonce = reader.read_u64::<LittleEndian>()?;
                let mut connect_token_data = [0; CONNECT_TOKEN_BYTES];
                reader.read_exact(&mut connect_token_data)?;
                Ok(Packet::ConnectionRequest(ConnectionRequestPacket {
                    connect_token_data,
                    connect_token_nonce,
                }))
            }
            Self::DENIED => Ok(Packet::ConnectionDenied),
            Self::CHALLENGE => {
                let challenge_token_nonce = reader.read_u64::<LittleEndian>()?;
                let mut challenge_token_data = [0; CHALLENGE_TOKEN_BYTES];
                reader.read_exact(&mut challenge_token_data)?;
                Ok(Packet::ConnectionChallenge(ConnectionChallengePacket {
                    challenge_token_data,
                    challenge_token_nonce,
                }))
            }
            Self::RESPONSE => {
                let challenge_token_nonce = reader.read_u64::<LittleEndian>()?;
                let mut challenge_token_data = [0; CHALLENGE_TOKEN_BYTES];
                reader.read_exact(&mut challenge_token_data)?;
                Ok(Packet::ConnectionResponse(ConnectionResponsePacket {
                    challenge_token_data,
                    challenge_token_nonce,
                }))
            }
            Self::HEART_BEAT => Ok(Packet::ConnectionHeartBeat),
            Self::DISCONNECT => Ok(Packet::ConnectionDisconnect),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid packet type",
            )),
        }
    }
}

#[test]
fn packet_wire_round_trip() {
    use crate::consts::MAX_PACKET_BYTES;

    let packets = [
        Packet::ConnectionRequest(ConnectionRequestPacket {
            connect_token_data: [0xau8; CONNECT_TOKEN_BYTES],
            connect_token_nonce: 0xdead,
        }),
        Packet::ConnectionChallenge(ConnectionChallengePacket {
            challenge_token_data: [0xbu8; CHALLENGE_TOKEN_BYTES],
            challenge_token_nonce: 3,
        }),
        Packet::ConnectionHeartBeat,
    ];
    for packet in packets {
        let mut buf = [0u8; MAX_PACKET_BYTES];
        let mut cursor = std::io::Cursor::new(&mut buf[..]);
        packet.write(&mut cursor).unwrap();
        let len = cursor.position() as usize;
        let mut cursor = std::io::Cursor::new(&buf[..len]);
        assert_eq!(Packet::read(&mut cursor).unwrap(), packet);
    }
}
