//! Password sourcing: explicit flag/env value, else an interactive prompt
//! when stderr is a terminal.
//!
//! Grounded on `examples/original_source/src/rekord/config.cc`'s
//! `FileIsVt100(stderr)` branch and on
//! `agucova-oxidized-cryptolib/crates/oxidized-cli/src/auth.rs`'s
//! `rpassword` prompt pattern.

use anyhow::{bail, Context, Result};
use rand::Rng;
use std::io::{IsTerminal, Write};

const GENERATED_PASSWORD_LEN: usize = 24;
const GENERATED_PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Resolves a password already supplied via flag/env, or prompts for one
/// interactively. Fails if none was supplied and stderr isn't a terminal
/// (e.g. running in a script or a cron job).
pub fn resolve(explicit: Option<String>, label: &str) -> Result<String> {
    if let Some(password) = explicit {
        return Ok(password);
    }
    if !std::io::stderr().is_terminal() {
        bail!("no password supplied for {label} and stdin is not a terminal to prompt on");
    }
    eprint!("{label}: ");
    std::io::stderr().flush().context("flushing prompt")?;
    let password = rpassword::read_password().context("reading password")?;
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}

/// Generates a fresh random password for `init` when none was given on the
/// command line, so the caller always gets something to write down.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| GENERATED_PASSWORD_ALPHABET[rng.gen_range(0..GENERATED_PASSWORD_ALPHABET.len())] as char)
        .collect()
}
