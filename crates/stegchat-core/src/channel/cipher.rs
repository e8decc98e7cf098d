//! AES-256-CBC with a random IV prefix and PKCS#7 padding.
//!
//! The ciphertext carries no authentication tag. Integrity rests on the
//! steganographic decode and the padding check only.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::StegchatError;
use crate::result::Result;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Encrypts under a fresh random IV.
///
/// The output format is: IV (16 bytes) || ciphertext (padded to the block size)
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| StegchatError::CryptoFailure(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverses [`encrypt`], wrong keys almost always surface as a padding error.
pub fn decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN + BLOCK_LEN || (data.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(StegchatError::CryptoFailure(format!(
            "ciphertext of {} bytes is not IV plus whole blocks",
            data.len()
        )));
    }

    let (iv, ciphertext) = data.split_at(IV_LEN);
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| StegchatError::CryptoFailure(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StegchatError::CryptoFailure("invalid padding".to_string()))
}
