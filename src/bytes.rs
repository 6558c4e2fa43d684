use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub trait Bytes: Sized {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error>;
    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error>;
}

const ADDRESS_IPV4: u8 = 1;
const ADDRESS_IPV6: u8 = 2;

impl Bytes for SocketAddr {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        match self {
            SocketAddr::V4(addr) => {
                writer.write_u8(ADDRESS_IPV4)?;
                writer.write_u16::<LittleEndian>(addr.port())?;
                writer.write_all(&addr.ip().octets())?;
            }
            SocketAddr::V6(addr) => {
                writer.write_u8(ADDRESS_IPV6)?;
                writer.write_u16::<LittleEndian>(addr.port())?;
                writer.write_all(&addr.ip().octets())?;
            }
        }
        Ok(())
    }

    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let addr_type = reader.read_u8()?;
        let port = reader.read_u16::<LittleEndian>()?;
        match addr_type {
            ADDRESS_IPV4 => {
                let mut octets = [0; 4];
                reader.read_exact(&mut octets)?;
                Ok(SocketAddr::from((Ipv4Addr::from(octets), port)))
            }
            ADDRESS_IPV6 => {
                let mut octets = [0; 16];
                reader.read_exact(&mut octets)?;
                Ok(SocketAddr::from((Ipv6Addr::from(octets), port)))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid ip address type",
            )),
        }
    }
}
