//! SFTP transport.
//!
//! `ssh2` is a synchronous binding over libssh2, so every operation here
//! runs on the blocking thread pool via `tokio::task::spawn_blocking`. A
//! single authenticated session is shared behind a mutex; `spec.md`'s
//! framing of the SSH client as an external collaborator the core merely
//! composes (not a protocol to reimplement) is satisfied by `ssh2` itself,
//! the way S3 is satisfied by `object_store`.
//!
//! Credentials and connection target are read from `SSH_PASSWORD` /
//! `SSH_KEYFILE` environment variables and the repository URL, following
//! the same env-then-url precedence `examples/original_source/src/rekord/config.cc`
//! uses for S3 credentials.

use crate::backend::Backend;
use crate::error::{Error, Result};
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SftpBackend {
    root: String,
    inner: Arc<Mutex<Sftp>>,
}

struct ParsedTarget {
    user: String,
    host: String,
    port: u16,
    path: String,
}

fn parse_target(url: &str) -> Result<ParsedTarget> {
    let without_scheme = url
        .strip_prefix("sftp://")
        .or_else(|| url.strip_prefix("ssh://"))
        .unwrap_or(url);

    let (userhost, path) = without_scheme
        .split_once(':')
        .or_else(|| without_scheme.split_once('/').map(|(h, p)| (h, p)))
        .ok_or_else(|| Error::Config(format!("cannot parse SFTP target: {url}")))?;

    let (user, hostport) = userhost
        .split_once('@')
        .ok_or_else(|| Error::Config(format!("SFTP target is missing a username: {url}")))?;

    let (host, port) = match hostport.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid SFTP port in: {url}")))?,
        ),
        None => (hostport.to_string(), 22),
    };

    Ok(ParsedTarget {
        user: user.to_string(),
        host,
        port,
        path: path.trim_start_matches('/').to_string(),
    })
}

impl SftpBackend {
    pub fn connect(url: &str) -> Result<Self> {
        let target = parse_target(url)?;

        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .map_err(|e| Error::Backend(format!("connecting to {}:{}: {e}", target.host, target.port)))?;
        let mut session = Session::new().map_err(|e| Error::Backend(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| Error::Backend(format!("SSH handshake failed: {e}")))?;

        if let Ok(keyfile) = std::env::var("SSH_KEYFILE") {
            session
                .userauth_pubkey_file(&target.user, None, FsPath::new(&keyfile), None)
                .map_err(|e| Error::Auth(format!("SSH public key auth failed: {e}")))?;
        } else if let Ok(password) = std::env::var("SSH_PASSWORD") {
            session
                .userauth_password(&target.user, &password)
                .map_err(|e| Error::Auth(format!("SSH password auth failed: {e}")))?;
        } else {
            session
                .userauth_agent(&target.user)
                .map_err(|e| Error::Auth(format!("SSH agent auth failed: {e}")))?;
        }
        if !session.authenticated() {
            return Err(Error::Auth("SSH session did not authenticate".into()));
        }

        let sftp = session.sftp().map_err(|e| Error::Backend(format!("opening SFTP channel: {e}")))?;

        Ok(Self {
            root: target.path,
            inner: Arc::new(Mutex::new(sftp)),
        })
    }

    fn full_path(&self, path: &str) -> String {
        if self.root.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.root, path)
        }
    }
}

#[async_trait]
impl Backend for SftpBackend {
    async fn init(&self) -> Result<()> {
        let sftp = self.inner.clone();
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let sftp = sftp.blocking_lock();
            mkdir_p(&sftp, &root)?;
            for bucket in 0u16..256 {
                mkdir_p(&sftp, &format!("{root}/blobs/{bucket:02x}"))?;
            }
            mkdir_p(&sftp, &format!("{root}/tags"))?;
            mkdir_p(&sftp, &format!("{root}/keys"))?;
            Ok(())
        })
        .await?
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let sftp = self.inner.clone();
        let full = self.full_path(path);
        tokio::task::spawn_blocking(move || {
            let sftp = sftp.blocking_lock();
            Ok(sftp.stat(FsPath::new(&full)).is_ok())
        })
        .await?
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let sftp = self.inner.clone();
        let full = self.full_path(path);
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let sftp = sftp.blocking_lock();
            let mut file = sftp
                .open(FsPath::new(&full))
                .map_err(|e| Error::Backend(format!("opening {full}: {e}")))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| Error::Backend(format!("reading {full}: {e}")))?;
            Ok(buf)
        })
        .await?
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let sftp = self.inner.clone();
        let full = self.full_path(path);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let sftp = sftp.blocking_lock();
            if sftp.stat(FsPath::new(&full)).is_ok() {
                // Content-addressed: an existing path already holds these
                // bytes.
                return Ok(());
            }
            let tmp = format!("{full}.tmp.{}", std::process::id());
            {
                let mut file = sftp
                    .create(FsPath::new(&tmp))
                    .map_err(|e| Error::Backend(format!("creating {tmp}: {e}")))?;
                file.write_all(&data)
                    .map_err(|e| Error::Backend(format!("writing {tmp}: {e}")))?;
            }
            sftp.rename(FsPath::new(&tmp), FsPath::new(&full), None)
                .map_err(|e| Error::Backend(format!("renaming {tmp} to {full}: {e}")))?;
            Ok(())
        })
        .await?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let sftp = self.inner.clone();
        let full = self.full_path(prefix);
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let sftp = sftp.blocking_lock();
            let entries = sftp
                .readdir(FsPath::new(&full))
                .map_err(|e| Error::Backend(format!("listing {full}: {e}")))?;
            Ok(entries
                .into_iter()
                .filter_map(|(path, _stat)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect())
        })
        .await?
    }
}

fn mkdir_p(sftp: &Sftp, path: &str) -> Result<()> {
    match sftp.mkdir(FsPath::new(path), 0o755) {
        Ok(()) => Ok(()),
        Err(e) if e.code() == ssh2::ErrorCode::SFTP(4) => Ok(()), // LIBSSH2_FX_FAILURE: already exists
        Err(e) => Err(Error::Backend(format!("creating directory {path}: {e}"))),
    }
}
