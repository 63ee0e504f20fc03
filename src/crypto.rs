use md5::{Digest, Md5};
use twofish::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

use crate::consts::{CHALLENGE_SIZE, OBFUSCATE_KEY, OBFUSCATE_OFFSET};

pub const KEY_BYTES: usize = 16;
pub const BLOCK_BYTES: usize = 16;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid twofish key length")]
    InvalidKey,
    #[error("challenge must be a multiple of {BLOCK_BYTES} bytes, got {0}")]
    BlockSizeMismatch(usize),
}

/// Applies the rolling XOR obfuscation to `buf` in place. Applying it twice
/// restores the input.
pub fn obfuscate(buf: &mut [u8]) {
    for (b, k) in buf.iter_mut().zip(OBFUSCATE_KEY.iter().cycle()) {
        *b ^= k;
    }
}

/// Obfuscates everything from byte 16 on, leaving the tag and version
/// header readable. Short payloads are left untouched.
pub fn obfuscate_login(buf: &mut [u8]) {
    if buf.len() > OBFUSCATE_OFFSET {
        obfuscate(&mut buf[OBFUSCATE_OFFSET..]);
    }
}

/// MD5 of a password, kept in place of the password when the user asks
/// the client to remember it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasswordHash(pub [u8; KEY_BYTES]);

impl PasswordHash {
    pub fn of(password: &str) -> Self {
        let digest: [u8; KEY_BYTES] = Md5::digest(crate::macroman::encode(password)).into();
        Self(digest)
    }

    /// The Twofish key: the digest with each 32-bit word swapped from
    /// big-endian to little-endian.
    pub fn twofish_key(&self) -> [u8; KEY_BYTES] {
        swap_endian32(self.0)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != KEY_BYTES * 2 || !hex.is_ascii() {
            return None;
        }
        let mut out = [0u8; KEY_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

pub fn swap_endian32(bytes: [u8; KEY_BYTES]) -> [u8; KEY_BYTES] {
    let mut out = [0u8; KEY_BYTES];
    for (src, dst) in bytes.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
        let word = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        dst.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn cipher(key: &[u8; KEY_BYTES]) -> Result<Twofish, Error> {
    Twofish::new_from_slice(key).map_err(|_| Error::InvalidKey)
}

/// Twofish-ECB decrypt in place; each 16-byte block independently.
pub fn decrypt_ecb(buf: &mut [u8], key: &[u8; KEY_BYTES]) -> Result<(), Error> {
    if buf.len() % BLOCK_BYTES != 0 {
        return Err(Error::BlockSizeMismatch(buf.len()));
    }
    let cipher = cipher(key)?;
    for chunk in buf.chunks_exact_mut(BLOCK_BYTES) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

/// Twofish-ECB encrypt in place; each 16-byte block independently.
pub fn encrypt_ecb(buf: &mut [u8], key: &[u8; KEY_BYTES]) -> Result<(), Error> {
    if buf.len() % BLOCK_BYTES != 0 {
        return Err(Error::BlockSizeMismatch(buf.len()));
    }
    let cipher = cipher(key)?;
    for chunk in buf.chunks_exact_mut(BLOCK_BYTES) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

/// Computes the login answer for a server challenge:
/// `encrypt(md5(decrypt(challenge)))`, both under the swapped password key.
pub fn answer_challenge(
    challenge: &[u8; CHALLENGE_SIZE],
    password: &PasswordHash,
) -> Result<[u8; CHALLENGE_SIZE], Error> {
    let key = password.twofish_key();
    let mut plain = *challenge;
    decrypt_ecb(&mut plain, &key)?;
    let mut answer: [u8; CHALLENGE_SIZE] = Md5::digest(plain).into();
    encrypt_ecb(&mut answer, &key)?;
    Ok(answer)
}
