//! Repository keyring: the Curve25519 keypair, password-wrapped into
//! `full` (read+write) and `write` (write-only) slots.
//!
//! A repository has one public/secret keypair for sealing objects
//! ([`crate::codec`]). There is no separate hashing salt: the salt exposed
//! to the core is the repository public key itself, which doubles as the
//! BLAKE3 keying input (`examples/original_source/src/rekord/disk.hh`'s
//! `GetSalt()` returns `pkey` directly). Opening with the `full` password
//! unlocks the secret key (and, via it, the public key); opening with the
//! `write` password unlocks only the public key, enough to write and id
//! new objects but not to decrypt existing ones. Each slot is stored
//! independently under `keys/full` and `keys/write` so either password can
//! be rotated without the other.
//!
//! Grounded on `examples/original_source/src/rekord/repository_write.cc`'s
//! two-password model (`full`/`write`) and on `other_examples`'
//! `hbak_common/src/stream.rs` for deriving a wrapping key from a password
//! via `argon2`.

use crate::error::{Error, Result};
use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use crypto_box::{PublicKey, SecretKey};
use rand::RngCore;

const ARGON2_SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

const TAG_FULL: u8 = 0;
const TAG_WRITE: u8 = 1;

/// A freshly generated, not-yet-wrapped keyring, returned by
/// [`generate`].
pub struct NewKeyring {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

/// What a successful [`unlock`] grants.
pub enum Unlocked {
    Full { public_key: PublicKey, secret_key: SecretKey },
    WriteOnly { public_key: PublicKey },
}

impl Unlocked {
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Unlocked::Full { public_key, .. } => public_key,
            Unlocked::WriteOnly { public_key } => public_key,
        }
    }

    /// The BLAKE3 keying salt: the repository public key's own bytes.
    pub fn hash_salt(&self) -> &[u8; 32] {
        self.public_key().as_bytes()
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        match self {
            Unlocked::Full { secret_key, .. } => Some(secret_key),
            Unlocked::WriteOnly { .. } => None,
        }
    }
}

/// Generates a new keypair for a freshly initialized repository.
pub fn generate() -> NewKeyring {
    let secret_key = SecretKey::generate(&mut crypto_box::aead::OsRng);
    let public_key = secret_key.public_key();
    NewKeyring { public_key, secret_key }
}

fn derive_wrap_key(password: &str, argon_salt: &[u8; ARGON2_SALT_LEN]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), argon_salt, &mut key)
        .map_err(|e| Error::Config(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn wrap(password: &str, tag: u8, plaintext: &[u8]) -> Vec<u8> {
    let mut argon_salt = [0u8; ARGON2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut argon_salt);
    let wrap_key = derive_wrap_key(password, &argon_salt).expect("argon2 parameters are fixed and valid");

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new((&wrap_key).into());
    let ciphertext = cipher.encrypt(nonce, plaintext).expect("encrypting a fixed-size keyring slot never fails");

    let mut out = Vec::with_capacity(1 + ARGON2_SALT_LEN + NONCE_LEN + ciphertext.len());
    out.push(tag);
    out.extend_from_slice(&argon_salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Wraps the `full` slot: grants the secret key (and, via it, the public
/// key and hashing salt).
pub fn wrap_full(password: &str, keyring: &NewKeyring) -> Vec<u8> {
    wrap(password, TAG_FULL, keyring.secret_key.as_bytes())
}

/// Wraps the `write` slot: grants only the public key (and hashing salt).
pub fn wrap_write(password: &str, keyring: &NewKeyring) -> Vec<u8> {
    wrap(password, TAG_WRITE, keyring.public_key.as_bytes())
}

/// Unwraps whichever slot `blob` encodes, given the matching password.
pub fn unlock(password: &str, blob: &[u8]) -> Result<Unlocked> {
    let min_len = 1 + ARGON2_SALT_LEN + NONCE_LEN + 16;
    if blob.len() < min_len {
        return Err(Error::Auth("key slot is truncated".into()));
    }
    let tag = blob[0];
    let mut argon_salt = [0u8; ARGON2_SALT_LEN];
    argon_salt.copy_from_slice(&blob[1..1 + ARGON2_SALT_LEN]);
    let nonce_start = 1 + ARGON2_SALT_LEN;
    let nonce = Nonce::from_slice(&blob[nonce_start..nonce_start + NONCE_LEN]);
    let ciphertext = &blob[nonce_start + NONCE_LEN..];

    let wrap_key = derive_wrap_key(password, &argon_salt)?;
    let cipher = ChaCha20Poly1305::new((&wrap_key).into());
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::Auth("wrong password".into()))?;

    if plaintext.len() != KEY_LEN {
        return Err(Error::Auth("key slot payload has the wrong length".into()));
    }

    match tag {
        TAG_FULL => {
            let mut secret_bytes = [0u8; KEY_LEN];
            secret_bytes.copy_from_slice(&plaintext);
            let secret_key = SecretKey::from(secret_bytes);
            let public_key = secret_key.public_key();
            Ok(Unlocked::Full { public_key, secret_key })
        }
        TAG_WRITE => {
            let mut public_bytes = [0u8; KEY_LEN];
            public_bytes.copy_from_slice(&plaintext);
            Ok(Unlocked::WriteOnly {
                public_key: PublicKey::from(public_bytes),
            })
        }
        other => Err(Error::Auth(format!("unknown key slot tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_password_unlocks_secret_and_public_key() {
        let keyring = generate();
        let wrapped = wrap_full("correct horse battery staple", &keyring);
        let unlocked = unlock("correct horse battery staple", &wrapped).unwrap();
        match unlocked {
            Unlocked::Full { secret_key, public_key } => {
                assert_eq!(secret_key.as_bytes(), keyring.secret_key.as_bytes());
                assert_eq!(public_key.as_bytes(), keyring.public_key.as_bytes());
            }
            Unlocked::WriteOnly { .. } => panic!("expected a full unlock"),
        }
    }

    #[test]
    fn write_password_grants_no_secret_key() {
        let keyring = generate();
        let wrapped = wrap_write("writer-password", &keyring);
        let unlocked = unlock("writer-password", &wrapped).unwrap();
        assert!(unlocked.secret_key().is_none());
        assert_eq!(unlocked.public_key().as_bytes(), keyring.public_key.as_bytes());
        assert_eq!(unlocked.hash_salt(), keyring.public_key.as_bytes());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let keyring = generate();
        let wrapped = wrap_full("right-password", &keyring);
        assert!(unlock("wrong-password", &wrapped).is_err());
    }
}
