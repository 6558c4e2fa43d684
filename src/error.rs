use thiserror::Error;

use crate::consts::MAX_SERVERS_PER_CONNECT_TOKEN;

#[derive(Error, Debug)]
#[error("failed to create and bind udp socket: {source}")]
pub struct SocketError {
    #[from]
    source: std::io::Error,
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("buffer size mismatch")]
    BufferSizeMismatch,
    #[error("failed to encrypt or decrypt: {0}")]
    Failed(chacha20poly1305::aead::Error),
    #[error("failed to generate key: {0}")]
    GenerateKey(chacha20poly1305::aead::rand_core::Error),
}

impl From<chacha20poly1305::aead::Error> for CryptoError {
    fn from(source: chacha20poly1305::aead::Error) -> Self {
        CryptoError::Failed(source)
    }
}

#[derive(Error, Debug)]
pub enum DoormanError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("connect token must contain at least one server address")]
    NoServerAddresses,
    #[error("connect token supports at most {MAX_SERVERS_PER_CONNECT_TOKEN} server addresses, got {0}")]
    TooManyServerAddresses(usize),
    #[error("client id 0 is reserved as invalid")]
    InvalidClientId,
    #[error("transport refused the encryption mapping")]
    EncryptionMapping,
}

impl From<std::convert::Infallible> for DoormanError {
    fn from(infallible: std::convert::Infallible) -> Self {
        match infallible {}
    }
}
