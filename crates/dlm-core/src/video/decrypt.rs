//! AES-128-CBC segment decryption for HLS `#EXT-X-KEY:METHOD=AES-128`
//! (§4.8 step 3). Grounded on the pinned `aes`/`cbc`/`cipher` combination
//! used elsewhere in the retrieved pack for this exact cipher.

use crate::error::{DlmError, Result};
use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Derives the IV for a fragment when the playlist's `#EXT-X-KEY` carries no
/// explicit `IV=`: a 16-byte big-endian encoding of the media sequence
/// number (§4.8 step 3).
pub fn iv_from_sequence_number(seq: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&seq.to_be_bytes());
    iv
}

/// Decrypts one fragment's ciphertext in place, given the fetched 16-byte
/// key and the IV (explicit or sequence-derived).
pub fn decrypt_segment(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| DlmError::DecryptFailed(format!("bad key/iv: {e}")))?;
    let len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| DlmError::DecryptFailed(format!("padding/decrypt error: {e}")))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}
