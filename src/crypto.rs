use byteorder::{LittleEndian, WriteBytesExt};
use chacha20poly1305::{
    aead::{heapless::Vec, rand_core::RngCore, AeadInPlace, OsRng},
    ChaCha20Poly1305, KeyInit,
};
use std::io;

use crate::{
    consts::{AUTH_BYTES, KEY_BYTES},
    error::{CryptoError, DoormanError},
};

pub type Key = [u8; KEY_BYTES];

pub fn generate_key() -> Result<Key, DoormanError> {
    let mut key: Key = [0; KEY_BYTES];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(CryptoError::GenerateKey)?;
    Ok(key)
}

// u64 counter nonces are zero-extended little-endian into the low 8 bytes of the
// 96-bit chacha nonce; the high 4 bytes stay zero.
fn final_nonce(nonce: u64) -> Result<[u8; 12], io::Error> {
    let mut out = [0; 12];
    io::Cursor::new(&mut out[4..]).write_u64::<LittleEndian>(nonce)?;
    Ok(out)
}

pub fn encrypt<const N: usize>(
    buffer: &[u8],
    associated_data: Option<&[u8]>,
    nonce: u64,
    key: &Key,
) -> Result<[u8; N], CryptoError> {
    let final_nonce = final_nonce(nonce)?;
    let mut out: Vec<u8, N> = Vec::new();
    out.extend_from_slice(&buffer[..N - AUTH_BYTES])
        .map_err(|_| CryptoError::BufferSizeMismatch)?;
    ChaCha20Poly1305::new(key.into()).encrypt_in_place(
        &final_nonce.into(),
        associated_data.unwrap_or_default(),
        &mut out,
    )?;
    out.into_array().map_err(|_| CryptoError::BufferSizeMismatch)
}

pub fn decrypt<const N: usize>(
    buffer: &mut [u8],
    associated_data: Option<&[u8]>,
    nonce: u64,
    key: &Key,
) -> Result<(), CryptoError> {
    let final_nonce = final_nonce(nonce)?;
    let mut out: Vec<u8, N> = Vec::new();
    out.extend_from_slice(buffer)
        .map_err(|_| CryptoError::BufferSizeMismatch)?;
    ChaCha20Poly1305::new(key.into()).decrypt_in_place(
        &final_nonce.into(),
        associated_data.unwrap_or_default(),
        &mut out,
    )?;
    buffer[..N - AUTH_BYTES].copy_from_slice(&out);
    Ok(())
}

#[test]
fn decrypt_rejects_tampered_ciphertext() {
    let key = generate_key().unwrap();
    let plain = [0x42u8; 64];
    let mut sealed: [u8; 80] = encrypt(&plain, None, 7, &key).unwrap();
    sealed[10] ^= 0x01;
    assert!(decrypt::<80>(&mut sealed, None, 7, &key).is_err());
}

#[test]
fn decrypt_rejects_wrong_nonce() {
    let key = generate_key().unwrap();
    let plain = [0x42u8; 64];
    let mut sealed: [u8; 80] = encrypt(&plain, None, 7, &key).unwrap();
    assert!(decrypt::<80>(&mut sealed, None, 8, &key).is_err());
}
