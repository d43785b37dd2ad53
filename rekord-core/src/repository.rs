//! Repository handle (C5): opens a backend, unlocks a keyring, and exposes
//! the primitive object/tag operations everything else builds on.
//!
//! Grounded on `examples/original_source/src/rekord/disk.cc`'s
//! `ReadObject`/`WriteObject`/`HasObject`/`WriteTag`/`ListTags` and on
//! `config.cc`'s URL-based backend selection.

use crate::backend::{self, Backend};
use crate::cache::Cache;
use crate::codec::{self, ObjectType};
use crate::error::{Error, Result};
use crate::keyring::{self, NewKeyring, Unlocked};
use crate::oid::Oid;
use crypto_box::{PublicKey, SecretKey};
use rand::Rng;
use std::sync::Arc;

const TAG_NAME_LEN: usize = 16;
const TAG_NAME_MAX_ATTEMPTS: u32 = 1000;
const TAG_NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadWrite,
    WriteOnly,
}

pub struct Repository {
    backend: Arc<dyn Backend>,
    mode: Mode,
    public_key: PublicKey,
    secret_key: Option<SecretKey>,
}

impl Repository {
    /// Creates a brand-new repository at `url`: initializes the backend's
    /// layout, generates a keyring, and stores it password-wrapped under
    /// both `keys/full` and `keys/write`.
    pub async fn init(url: &str, full_password: &str, write_password: &str) -> Result<Self> {
        let backend = backend::open(url).await?;
        backend.init().await?;

        let keyring: NewKeyring = keyring::generate();
        let full_blob = keyring::wrap_full(full_password, &keyring);
        let write_blob = keyring::wrap_write(write_password, &keyring);

        backend.write("keys/full", &full_blob).await?;
        backend.write("keys/write", &write_blob).await?;

        Ok(Self {
            backend,
            mode: Mode::ReadWrite,
            public_key: keyring.public_key,
            secret_key: Some(keyring.secret_key),
        })
    }

    /// Opens an existing repository, trying the `full` slot first and
    /// falling back to `write`, matching whichever one `password` unlocks.
    pub async fn open(url: &str, password: &str) -> Result<Self> {
        let backend = backend::open(url).await?;

        let full_blob = backend.read("keys/full").await?;
        if let Ok(Unlocked::Full { public_key, secret_key }) = keyring::unlock(password, &full_blob) {
            return Ok(Self {
                backend,
                mode: Mode::ReadWrite,
                public_key,
                secret_key: Some(secret_key),
            });
        }

        let write_blob = backend.read("keys/write").await?;
        if let Ok(Unlocked::WriteOnly { public_key }) = keyring::unlock(password, &write_blob) {
            return Ok(Self {
                backend,
                mode: Mode::WriteOnly,
                public_key,
                secret_key: None,
            });
        }

        Err(Error::Auth("password does not match either key slot".into()))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The BLAKE3 keying salt: the repository public key's own bytes
    /// (`spec.md` §3 — the salt exposed to the core is the repository
    /// public key, doubling as the keying input).
    pub fn hash_salt(&self) -> &[u8; 32] {
        self.public_key.as_bytes()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Computes the id `plaintext` would have as an object of kind `kind`,
    /// without storing anything.
    pub fn object_id(&self, kind: ObjectType, plaintext: &[u8]) -> Oid {
        codec::hash_object(self.hash_salt(), kind, plaintext)
    }

    pub async fn has_object(&self, oid: &Oid) -> Result<bool> {
        self.backend.exists(&oid.blob_path()).await
    }

    /// Writes `plaintext` as an object of kind `kind`, returning its id and
    /// whether it was actually written. A pre-existing object with the
    /// same id is left untouched (dedup) and reported as not-written, so
    /// callers tracking newly stored bytes don't double-count it.
    pub async fn write_object(&self, kind: ObjectType, plaintext: &[u8], cache: &Cache) -> Result<(Oid, bool)> {
        let oid = self.object_id(kind, plaintext);
        if cache.has_object(&oid) || self.has_object(&oid).await? {
            cache.record_object(&oid);
            return Ok((oid, false));
        }
        let envelope = codec::seal_object(&self.public_key, kind, plaintext);
        self.backend.write(&oid.blob_path(), &envelope).await?;
        cache.record_object(&oid);
        Ok((oid, true))
    }

    /// Reads and decrypts the object named by `oid`. Requires the `full`
    /// password (a write-only repository cannot decrypt anything).
    pub async fn read_object(&self, oid: &Oid) -> Result<(ObjectType, Vec<u8>)> {
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or_else(|| Error::Auth("this repository was opened write-only; it cannot decrypt objects".into()))?;
        let raw = self.backend.read(&oid.blob_path()).await?;
        codec::open_object(secret_key, &raw).map_err(|e| match e {
            Error::Backend(reason) => Error::corrupt(*oid, reason),
            other => other,
        })
    }

    /// Writes a new tag pointing at `oid`: a sealed-box-encrypted pointer
    /// under a random 16-character filename in `tags/`. Widened from the
    /// original implementation's 8 characters (see `SPEC_FULL.md`'s
    /// REDESIGN notes) since an 8-character alphanumeric name collides
    /// often enough, across a long-lived repository, to matter.
    pub async fn write_tag(&self, oid: &Oid) -> Result<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..TAG_NAME_MAX_ATTEMPTS {
            let name: String = (0..TAG_NAME_LEN)
                .map(|_| TAG_NAME_ALPHABET[rng.gen_range(0..TAG_NAME_ALPHABET.len())] as char)
                .collect();
            let path = format!("tags/{name}");
            if self.backend.exists(&path).await? {
                continue;
            }
            let sealed_box = crypto_box::SealedBox::new(&self.public_key);
            let sealed = sealed_box
                .seal(&mut crypto_box::aead::OsRng, oid.as_bytes().as_slice())
                .expect("sealing a 32-byte object id never fails");
            self.backend.write(&path, &sealed).await?;
            return Ok(name);
        }
        Err(Error::Backend("could not find an unused tag name".into()))
    }

    /// Lists every valid tag as `(name, oid)`, skipping (and logging) any
    /// entry that fails to unseal rather than treating it as fatal —
    /// mirrors `rk_ListTags`' tolerance of partially-written or foreign
    /// files under `tags/`.
    pub async fn list_tags(&self) -> Result<Vec<(String, Oid)>> {
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or_else(|| Error::Auth("this repository was opened write-only; it cannot read tags".into()))?;

        let mut out = Vec::new();
        for path in self.backend.list("tags/").await? {
            let name = match path.rsplit('/').next() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let sealed = match self.backend.read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(tag = %name, error = %e, "skipping unreadable tag");
                    continue;
                }
            };
            match crypto_box::SealedBox::open(secret_key, sealed.as_slice()) {
                Ok(plaintext) if plaintext.len() == 32 => {
                    let mut bytes = [0u8; 32];
                    bytes.copy_from_slice(&plaintext);
                    out.push((name, Oid::from_bytes(bytes)));
                }
                _ => {
                    tracing::warn!(tag = %name, "skipping malformed tag");
                }
            }
        }
        Ok(out)
    }
}
