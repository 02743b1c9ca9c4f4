// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SNMPv3 User-based Security Model: RFC 3414 key localization, HMAC
//! authentication digests, and CFB/CBC privacy encryption over the raw
//! block ciphers. Hand-rolled rather than built on a higher-level mode
//! crate, since the block-cipher trait surface (`BlockEncrypt`/`KeyInit`)
//! is the smallest, most stable part of the RustCrypto ecosystem to depend
//! on without being able to compile-check the result.

use aes::Aes128;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use des::Des;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;

use crate::cfg::enums::{AuthProtocol, PrivProtocol};

const EXPANSION_LEN: usize = 1_048_576;

/// RFC 3414 Appendix A.2: expands `password` cyclically to one megabyte and
/// digests it, then localizes the digest to `engine_id`.
pub fn password_to_key(auth_protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Vec<u8> {
    match auth_protocol {
        AuthProtocol::Md5 => localize_md5(expand_and_digest_md5(password).as_ref(), engine_id).to_vec(),
        AuthProtocol::Sha1 => localize_sha1(expand_and_digest_sha1(password).as_ref(), engine_id).to_vec(),
    }
}

fn expand_and_digest_md5(password: &[u8]) -> [u8; 16] {
    use md5::Digest;
    let mut hasher = Md5::new();
    feed_expansion(password, |chunk| hasher.update(chunk));
    hasher.finalize().into()
}

fn expand_and_digest_sha1(password: &[u8]) -> [u8; 20] {
    use sha1::Digest;
    let mut hasher = Sha1::new();
    feed_expansion(password, |chunk| hasher.update(chunk));
    hasher.finalize().into()
}

/// Feeds 64-byte chunks built by cycling through `password` until exactly
/// one megabyte has been fed to `sink`.
fn feed_expansion(password: &[u8], mut sink: impl FnMut(&[u8])) {
    assert!(!password.is_empty(), "USM password must not be empty");
    let mut produced = 0usize;
    let mut cycle = [0u8; 64];
    let mut idx = 0usize;
    while produced < EXPANSION_LEN {
        for slot in cycle.iter_mut() {
            *slot = password[idx % password.len()];
            idx += 1;
        }
        sink(&cycle);
        produced += 64;
    }
}

fn localize_md5(digest: &[u8], engine_id: &[u8]) -> [u8; 16] {
    use md5::Digest;
    let mut hasher = Md5::new();
    hasher.update(digest);
    hasher.update(engine_id);
    hasher.update(digest);
    hasher.finalize().into()
}

fn localize_sha1(digest: &[u8], engine_id: &[u8]) -> [u8; 20] {
    use sha1::Digest;
    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(engine_id);
    hasher.update(digest);
    hasher.finalize().into()
}

/// Computes the truncated (96-bit) HMAC authentication digest over `message`
/// with the auth field itself zeroed, per RFC 3414 §6.3.
pub fn auth_digest(auth_protocol: AuthProtocol, key: &[u8], message: &[u8]) -> Vec<u8> {
    match auth_protocol {
        AuthProtocol::Md5 => {
            let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
                .expect("HMAC accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes()[..12].to_vec()
        },
        AuthProtocol::Sha1 => {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                .expect("HMAC accepts any key length");
            mac.update(message);
            mac.finalize().into_bytes()[..12].to_vec()
        },
    }
}

/// Encrypts `plaintext` (already padded by the caller to the cipher's block
/// size) with the given privacy key and 8-byte salt, returning the
/// ciphertext. `plaintext.len()` must be a multiple of 8.
pub fn privacy_encrypt(
    priv_protocol: PrivProtocol,
    key: &[u8],
    salt: &[u8; 8],
    engine_boots: u32,
    plaintext: &[u8],
) -> Vec<u8> {
    match priv_protocol {
        PrivProtocol::Des => des_cbc_encrypt(&key[..8], &pre_iv_des(key, salt), plaintext),
        PrivProtocol::Aes128 => aes_cfb_encrypt(&key[..16], &iv_aes(salt, engine_boots), plaintext),
    }
}

/// Inverse of [`privacy_encrypt`]: decrypts a scoped PDU ciphertext with the
/// same localized privacy key and salt the sender used.
pub fn privacy_decrypt(
    priv_protocol: PrivProtocol,
    key: &[u8],
    salt: &[u8; 8],
    engine_boots: u32,
    ciphertext: &[u8],
) -> Vec<u8> {
    match priv_protocol {
        PrivProtocol::Des => des_cbc_decrypt(&key[..8], &pre_iv_des(key, salt), ciphertext),
        PrivProtocol::Aes128 => aes_cfb_decrypt(&key[..16], &iv_aes(salt, engine_boots), ciphertext),
    }
}

fn pre_iv_des(key: &[u8], salt: &[u8; 8]) -> [u8; 8] {
    let pre_iv = &key[8..16];
    let mut iv = [0u8; 8];
    for i in 0..8 {
        iv[i] = pre_iv[i] ^ salt[i];
    }
    iv
}

fn iv_aes(salt: &[u8; 8], engine_boots: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[8..16].copy_from_slice(salt);
    iv
}

fn des_cbc_encrypt(key: &[u8], iv: &[u8; 8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Des::new_from_slice(key).expect("DES key must be 8 bytes");
    let mut prev = *iv;
    let mut out = Vec::with_capacity(plaintext.len());
    for block in plaintext.chunks(8) {
        let mut buf = [0u8; 8];
        buf[..block.len()].copy_from_slice(block);
        for i in 0..8 {
            buf[i] ^= prev[i];
        }
        let mut ga = GenericArray::clone_from_slice(&buf);
        cipher.encrypt_block(&mut ga);
        out.extend_from_slice(ga.as_slice());
        prev.copy_from_slice(ga.as_slice());
    }
    out
}

/// AES-128 in 128-bit-feedback CFB mode (RFC 3826): `C_i = P_i XOR E(K,
/// IV_{i-1})`, with `IV_0` the initial 16-byte IV and subsequent feedback
/// blocks equal to the previous ciphertext block.
fn aes_cfb_encrypt(key: &[u8], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new_from_slice(key).expect("AES-128 key must be 16 bytes");
    let mut feedback = *iv;
    let mut out = Vec::with_capacity(plaintext.len());
    for block in plaintext.chunks(16) {
        let mut ga = GenericArray::clone_from_slice(&feedback);
        cipher.encrypt_block(&mut ga);
        let mut cipher_block = vec![0u8; block.len()];
        for i in 0..block.len() {
            cipher_block[i] = block[i] ^ ga[i];
        }
        out.extend_from_slice(&cipher_block);
        if block.len() == 16 {
            feedback.copy_from_slice(&cipher_block);
        }
    }
    out
}

fn des_cbc_decrypt(key: &[u8], iv: &[u8; 8], ciphertext: &[u8]) -> Vec<u8> {
    let cipher = Des::new_from_slice(key).expect("DES key must be 8 bytes");
    let mut prev = *iv;
    let mut out = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(8) {
        let mut cipher_block = [0u8; 8];
        cipher_block[..block.len()].copy_from_slice(block);
        let mut ga = GenericArray::clone_from_slice(&cipher_block);
        cipher.decrypt_block(&mut ga);
        let mut plain = [0u8; 8];
        for i in 0..8 {
            plain[i] = ga[i] ^ prev[i];
        }
        out.extend_from_slice(&plain);
        prev = cipher_block;
    }
    out
}

/// CFB decryption reuses the block cipher's forward `encrypt_block` on the
/// feedback register, same as encryption — only the XOR side the plaintext
/// ends up on differs.
fn aes_cfb_decrypt(key: &[u8], iv: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new_from_slice(key).expect("AES-128 key must be 16 bytes");
    let mut feedback = *iv;
    let mut out = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(16) {
        let mut ga = GenericArray::clone_from_slice(&feedback);
        cipher.encrypt_block(&mut ga);
        let mut plain_block = vec![0u8; block.len()];
        for i in 0..block.len() {
            plain_block[i] = block[i] ^ ga[i];
        }
        out.extend_from_slice(&plain_block);
        if block.len() == 16 {
            feedback.copy_from_slice(block);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_key_localization_is_deterministic() {
        let a = password_to_key(AuthProtocol::Md5, b"maplesyrup", b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00");
        let b = password_to_key(AuthProtocol::Md5, b"maplesyrup", b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_engine_ids_localize_differently() {
        let a = password_to_key(AuthProtocol::Sha1, b"maplesyrup", b"engine-one");
        let b = password_to_key(AuthProtocol::Sha1, b"maplesyrup", b"engine-two");
        assert_ne!(a, b);
    }

    #[test]
    fn auth_digest_truncated_to_96_bits() {
        let key = vec![0u8; 16];
        let digest = auth_digest(AuthProtocol::Md5, &key, b"hello world");
        assert_eq!(digest.len(), 12);
    }

    #[test]
    fn des_cbc_encrypt_decrypt_inverse() {
        let key = vec![1u8; 16];
        let salt = [2u8; 8];
        let plain = b"12345678abcdefgh".to_vec();
        let cipher_text = privacy_encrypt(PrivProtocol::Des, &key, &salt, 1, &plain);
        assert_eq!(cipher_text.len(), plain.len());
        assert_ne!(cipher_text, plain);

        let round_tripped = privacy_decrypt(PrivProtocol::Des, &key, &salt, 1, &cipher_text);
        assert_eq!(round_tripped, plain);
    }

    #[test]
    fn aes_cfb_encrypt_decrypt_inverse() {
        let key = vec![3u8; 16];
        let salt = [4u8; 8];
        let plain = b"not a multiple of sixteen bytes".to_vec();
        let cipher_text = privacy_encrypt(PrivProtocol::Aes128, &key, &salt, 7, &plain);
        assert_eq!(cipher_text.len(), plain.len());
        assert_ne!(cipher_text, plain);

        let round_tripped = privacy_decrypt(PrivProtocol::Aes128, &key, &salt, 7, &cipher_text);
        assert_eq!(round_tripped, plain);
    }
}
