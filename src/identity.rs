use getrandom::getrandom;
use zeroize::Zeroize;

use crate::error::{Error, Result};

const MULTICODEC_ED25519_PREFIX: [u8; 2] = [0xed, 0x01];

/// Fill a fresh buffer from the OS entropy source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom(&mut buf).map_err(|e| Error::Crypto(format!("getrandom error: {e}")))?;
    Ok(buf)
}

/// Generate a 32-byte key seed and hand it to `build`, wiping the seed afterwards.
pub fn with_fresh_seed<T>(build: impl FnOnce(&[u8; 32]) -> T) -> Result<T> {
    let mut seed = random_bytes::<32>()?;
    let out = build(&seed);
    seed.zeroize();
    Ok(out)
}

/// Render an Ed25519 public key as a `did:key` identifier.
pub fn did_key_from_public(public_key: &[u8]) -> String {
    let mut data = Vec::with_capacity(MULTICODEC_ED25519_PREFIX.len() + public_key.len());
    data.extend_from_slice(&MULTICODEC_ED25519_PREFIX);
    data.extend_from_slice(public_key);
    let encoded = bs58::encode(data).into_string();
    format!("did:key:z{encoded}")
}

/// Record key of a student inside one university: `studentCode#universityCode`.
pub fn serial_id(student_code: &str, university_code: &str) -> String {
    format!("{student_code}#{university_code}")
}
