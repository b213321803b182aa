//! mysql_native_password scramble construction and verification.
//!
//! The token a client places in its auth packet is
//! `SHA1(challenge || SHA1(SHA1(password))) XOR SHA1(password)`; the server
//! stores only `SHA1(SHA1(password))` (the 40-hex-digit `PASSWORD()` form)
//! and can still validate the token against its challenge.

use rand::Rng;
use sha1::{Digest, Sha1};

use crate::protocol::packet::{AuthPacket, HandshakePacket, SCRAMBLE_LEN};

fn sha1_parts(parts: &[&[u8]]) -> [u8; SCRAMBLE_LEN] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Builds the 20-byte auth token for `password` against the server's random
/// `challenge`.
pub fn scramble_password(challenge: &[u8; SCRAMBLE_LEN], password: &str) -> [u8; SCRAMBLE_LEN] {
    let hash1 = sha1_parts(&[password.as_bytes()]);
    let hash2 = sha1_parts(&[&hash1]);
    let mut token = sha1_parts(&[challenge, &hash2]);
    for (t, h) in token.iter_mut().zip(hash1.iter()) {
        *t ^= h;
    }
    token
}

/// Server-side check of a client `token` against the `challenge` we issued
/// and the stored 40-hex-digit `sha1(sha1(password))`.
pub fn check_scramble(
    token: &[u8; SCRAMBLE_LEN],
    challenge: &[u8; SCRAMBLE_LEN],
    stored_hex: &str,
) -> bool {
    let Ok(stored) = hex::decode(stored_hex) else {
        return false;
    };
    if stored.len() != SCRAMBLE_LEN {
        return false;
    }

    // Recover SHA1(password), then re-derive the stored hash from it.
    let mut recovered = sha1_parts(&[challenge, &stored]);
    for (r, t) in recovered.iter_mut().zip(token.iter()) {
        *r ^= t;
    }
    let check = sha1_parts(&[&recovered]);
    check[..] == stored[..]
}

/// The `PASSWORD()` form of a plaintext password, as an embedder would keep
/// it in its user table.
pub fn password_hash(password: &str) -> String {
    hex::encode(sha1_parts(&[&sha1_parts(&[password.as_bytes()])]))
}

/// A fresh 20-byte handshake challenge, kept to printable, non-NUL bytes the
/// way stock servers issue them.
pub fn generate_challenge() -> [u8; SCRAMBLE_LEN] {
    let mut rng = rand::rng();
    std::array::from_fn(|_| rng.random::<u8>() % 94 + 33)
}

/// Writes the scramble for `password` into an auth packet, using the
/// challenge from the handshake that prompted it.
pub fn crypt_pass(auth: &mut AuthPacket, handshake: &HandshakePacket, password: &str) {
    auth.scramble = Some(scramble_password(&handshake.scramble, password));
}

/// Validates an auth packet's scramble against the handshake challenge and a
/// stored password hash. An absent scramble never matches.
pub fn check_pass(auth: &AuthPacket, handshake: &HandshakePacket, stored_hex: &str) -> bool {
    match &auth.scramble {
        Some(token) => check_scramble(token, &handshake.scramble, stored_hex),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> [u8; SCRAMBLE_LEN] {
        std::array::from_fn(|i| 0x41 + i as u8)
    }

    #[test]
    fn scramble_verifies_against_stored_hash() {
        let token = scramble_password(&challenge(), "test");
        assert!(check_scramble(&token, &challenge(), &password_hash("test")));
    }

    #[test]
    fn wrong_password_fails() {
        let token = scramble_password(&challenge(), "nope");
        assert!(!check_scramble(&token, &challenge(), &password_hash("test")));
    }

    #[test]
    fn wrong_challenge_fails() {
        let token = scramble_password(&challenge(), "test");
        let other: [u8; SCRAMBLE_LEN] = std::array::from_fn(|i| 0x61 + i as u8);
        assert!(!check_scramble(&token, &other, &password_hash("test")));
    }

    #[test]
    fn malformed_stored_hash_fails() {
        let token = scramble_password(&challenge(), "test");
        assert!(!check_scramble(&token, &challenge(), "zz"));
        assert!(!check_scramble(&token, &challenge(), "abcd"));
    }

    #[test]
    fn packet_level_helpers() {
        let mut handshake = HandshakePacket::new();
        handshake.scramble = challenge();

        let mut auth = AuthPacket {
            username: "app".to_string(),
            ..AuthPacket::default()
        };
        assert!(!check_pass(&auth, &handshake, &password_hash("test")));

        crypt_pass(&mut auth, &handshake, "test");
        assert!(check_pass(&auth, &handshake, &password_hash("test")));
        assert!(!check_pass(&auth, &handshake, &password_hash("other")));
    }

    #[test]
    fn challenge_bytes_are_printable() {
        for _ in 0..32 {
            for b in generate_challenge() {
                assert!((33..127).contains(&b));
            }
        }
    }
}
