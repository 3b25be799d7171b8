//! Symmetric encryption for the persisted user-password store.
//!
//! Six AES modes over `openssl::symm`, with key and IV derived from the
//! master key by the legacy single-iteration `SHA-1(password)` expansion.
//! This derivation is not a KDF suitable for cold-storage passwords; it is
//! kept only so pgvictoria can decrypt user files written by earlier
//! versions that used the same construction. Do not replace it with a
//! modern KDF without a migration path for existing files.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use openssl::symm::{Cipher, Crypter, Mode};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Supported AES mode/key-size combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesMode {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
}

impl AesMode {
    fn cipher(self) -> Cipher {
        match self {
            AesMode::Aes128Cbc => Cipher::aes_128_cbc(),
            AesMode::Aes192Cbc => Cipher::aes_192_cbc(),
            AesMode::Aes256Cbc => Cipher::aes_256_cbc(),
            AesMode::Aes128Ctr => Cipher::aes_128_ctr(),
            AesMode::Aes192Ctr => Cipher::aes_192_ctr(),
            AesMode::Aes256Ctr => Cipher::aes_256_ctr(),
        }
    }
}

/// Derive `key_len + iv_len` bytes from `password` via one iteration of
/// SHA-1, with no salt. Matches the legacy on-disk format byte-for-byte;
/// do not "fix" this into a proper KDF.
fn derive_key_iv(password: &[u8], key_len: usize, iv_len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut hasher = Sha1::new();
    hasher.update(password);
    let digest = hasher.finalize();

    let mut material: Vec<u8> = Vec::with_capacity(key_len + iv_len);
    while material.len() < key_len + iv_len {
        material.extend_from_slice(&digest);
    }
    material.truncate(key_len + iv_len);

    let key = material[..key_len].to_vec();
    let iv = material[key_len..key_len + iv_len].to_vec();
    (key, iv)
}

/// Encrypt `plain` under `mode`, keyed from `master_key`.
pub fn encrypt_buffer(plain: &[u8], mode: AesMode, master_key: &[u8]) -> Result<Vec<u8>> {
    let cipher = mode.cipher();
    let (key, iv) = derive_key_iv(master_key, cipher.key_len(), cipher.iv_len().unwrap_or(0));

    let mut crypter = Crypter::new(cipher, Mode::Encrypt, &key, Some(&iv))
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;

    let mut out = vec![0u8; plain.len() + cipher.block_size()];
    let mut count = crypter
        .update(plain, &mut out)
        .map_err(|e| Error::Crypto(format!("cipher update: {e}")))?;
    count += crypter
        .finalize(&mut out[count..])
        .map_err(|e| Error::Crypto(format!("cipher finalize: {e}")))?;
    out.truncate(count);
    Ok(out)
}

/// Decrypt `cipher_bytes` under `mode`, keyed from `master_key`. The
/// returned buffer carries one trailing NUL past the plaintext length so
/// it can be treated as a C-style string by callers that need that.
pub fn decrypt_buffer(cipher_bytes: &[u8], mode: AesMode, master_key: &[u8]) -> Result<Vec<u8>> {
    let cipher = mode.cipher();
    let (key, iv) = derive_key_iv(master_key, cipher.key_len(), cipher.iv_len().unwrap_or(0));

    let mut crypter = Crypter::new(cipher, Mode::Decrypt, &key, Some(&iv))
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;

    let mut out = vec![0u8; cipher_bytes.len() + cipher.block_size()];
    let mut count = crypter
        .update(cipher_bytes, &mut out)
        .map_err(|e| Error::Crypto(format!("cipher update: {e}")))?;
    count += crypter
        .finalize(&mut out[count..])
        .map_err(|e| Error::Crypto(format!("cipher finalize: {e}")))?;
    out.truncate(count);
    out.push(0);
    Ok(out)
}

const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// File format compatibility constraint: regardless of `mode`, on-disk
/// encryption always uses AES-256-CBC.
const FILE_MODE: AesMode = AesMode::Aes256Cbc;

/// Encrypt `from` into `to` (or `from` + `.aes` if `to` is `None`) in
/// 1 MiB chunks, then delete `from` on success.
pub fn encrypt_file(from: &Path, to: Option<&Path>, master_key: &[u8]) -> Result<()> {
    let dest = match to {
        Some(path) => path.to_path_buf(),
        None => {
            let mut name = from.as_os_str().to_os_string();
            name.push(".aes");
            name.into()
        }
    };

    let plain = fs::read(from)?;
    let mut out = fs::File::create(&dest)?;

    let cipher = FILE_MODE.cipher();
    let (key, iv) = derive_key_iv(master_key, cipher.key_len(), cipher.iv_len().unwrap_or(0));
    let mut crypter = Crypter::new(cipher, Mode::Encrypt, &key, Some(&iv))
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;

    let mut buf = vec![0u8; FILE_CHUNK_SIZE + cipher.block_size()];
    for chunk in plain.chunks(FILE_CHUNK_SIZE) {
        let count = crypter
            .update(chunk, &mut buf)
            .map_err(|e| Error::Crypto(format!("cipher update: {e}")))?;
        out.write_all(&buf[..count])?;
    }
    let count = crypter
        .finalize(&mut buf)
        .map_err(|e| Error::Crypto(format!("cipher finalize: {e}")))?;
    out.write_all(&buf[..count])?;
    out.flush()?;
    drop(out);

    fs::remove_file(from)?;
    Ok(())
}

/// Decrypt `from` into `to` (or `from` with one trailing extension
/// stripped, if `to` is `None`) in 1 MiB chunks, then delete `from` on
/// success.
pub fn decrypt_file(from: &Path, to: Option<&Path>, master_key: &[u8]) -> Result<()> {
    let dest = match to {
        Some(path) => path.to_path_buf(),
        None => from.with_extension(""),
    };

    let mut input = fs::File::open(from)?;
    let mut out = fs::File::create(&dest)?;

    let cipher = FILE_MODE.cipher();
    let (key, iv) = derive_key_iv(master_key, cipher.key_len(), cipher.iv_len().unwrap_or(0));
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, &key, Some(&iv))
        .map_err(|e| Error::Crypto(format!("cipher init: {e}")))?;

    let mut read_buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut write_buf = vec![0u8; FILE_CHUNK_SIZE + cipher.block_size()];
    loop {
        let n = input.read(&mut read_buf)?;
        if n == 0 {
            break;
        }
        let count = crypter
            .update(&read_buf[..n], &mut write_buf)
            .map_err(|e| Error::Crypto(format!("cipher update: {e}")))?;
        out.write_all(&write_buf[..count])?;
    }
    let count = crypter
        .finalize(&mut write_buf)
        .map_err(|e| Error::Crypto(format!("cipher finalize: {e}")))?;
    out.write_all(&write_buf[..count])?;
    out.flush()?;
    drop(out);
    drop(input);

    fs::remove_file(from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip_all_modes() {
        let modes = [
            AesMode::Aes128Cbc,
            AesMode::Aes192Cbc,
            AesMode::Aes256Cbc,
            AesMode::Aes128Ctr,
            AesMode::Aes192Ctr,
            AesMode::Aes256Ctr,
        ];
        let master_key = b"topsecret";
        let plain = b"a plaintext message that spans more than one AES block";

        for mode in modes {
            let cipher_bytes = encrypt_buffer(plain, mode, master_key).expect("encrypt");
            let decrypted = decrypt_buffer(&cipher_bytes, mode, master_key).expect("decrypt");
            assert_eq!(&decrypted[..plain.len()], plain);
            assert_eq!(decrypted[plain.len()], 0);
        }
    }

    #[test]
    fn file_encrypt_deletes_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("plain.txt");
        fs::write(&src, b"hello file crypto").expect("write src");

        let dest = dir.path().join("plain.txt.aes");
        encrypt_file(&src, Some(&dest), b"master").expect("encrypt_file");
        assert!(!src.exists());
        assert!(dest.exists());

        let restored = dir.path().join("plain.txt");
        decrypt_file(&dest, Some(&restored), b"master").expect("decrypt_file");
        assert!(!dest.exists());
        let contents = fs::read(&restored).expect("read restored");
        assert_eq!(contents, b"hello file crypto");
    }

    #[test]
    fn derive_key_iv_is_deterministic() {
        let (k1, iv1) = derive_key_iv(b"topsecret", 32, 16);
        let (k2, iv2) = derive_key_iv(b"topsecret", 32, 16);
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);
    }
}
