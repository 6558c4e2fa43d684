pub const MAX_CLIENTS: usize = 64;
pub const MAX_SERVERS_PER_CONNECT_TOKEN: usize = 8;
pub const MAX_CONNECT_TOKEN_ENTRIES: usize = MAX_CLIENTS * 16;

pub const KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 8;
pub const MAC_BYTES: usize = 16;
pub const AUTH_BYTES: usize = 16;
pub const CONNECT_TOKEN_BYTES: usize = 1024;
pub const CHALLENGE_TOKEN_BYTES: usize = 300;

pub const CONNECT_TOKEN_EXPIRY_SECONDS: u64 = 30;

/// Send rates and timeouts in seconds of the caller-supplied monotonic clock.
pub const CONNECTION_REQUEST_SEND_RATE: f64 = 0.1;
pub const CONNECTION_RESPONSE_SEND_RATE: f64 = 0.1;
pub const CONNECTION_CONFIRM_SEND_RATE: f64 = 0.1;
pub const CONNECTION_HEART_BEAT_RATE: f64 = 0.1;
pub const CONNECTION_REQUEST_TIME_OUT: f64 = 5.0;
pub const CHALLENGE_RESPONSE_TIME_OUT: f64 = 5.0;
pub const CONNECTION_TIME_OUT: f64 = 10.0;

pub(crate) const MAX_PACKET_BYTES: usize = 1200;
pub(crate) const MAX_ENCRYPTION_MAPPINGS: usize = MAX_CLIENTS * 4;

pub(crate) const SOCKET_RECV_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const SOCKET_SEND_BUF_SIZE: usize = 4 * 1024 * 1024;
