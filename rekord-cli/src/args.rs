//! Command-line surface: `rekord init|put|get|list`.
//!
//! Grounded on `spec.md` §6's command table and `examples/original_source/`'s
//! `rk_Main`/`rk_Init`/`rk_Put`/`rk_Get`/`rk_List` argument handling, in the
//! `clap` derive style used throughout the example pack
//! (`tvlfyi-tvix/store/src/bin/tvix-store.rs`,
//! `agucova-oxidized-cryptolib/crates/oxcrypt`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "rekord", author, version, about = "Content-addressed, encrypted, deduplicating backups", long_about = None)]
pub struct Cli {
    /// Path to an INI config file. Defaults to `$XDG_CONFIG_HOME/rekord/config.ini`
    /// if present.
    #[arg(short = 'C', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Repository URL (local path, `s3://...`, or `sftp://...`).
    #[arg(short = 'R', long = "repository", env = "REKORD_REPOSITORY", global = true)]
    pub repository: Option<String>,

    /// Repository password. Prompted for interactively if omitted and
    /// stderr is a terminal.
    #[arg(long = "password", env = "REKORD_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Worker pool size. Defaults to `6 × available parallelism`.
    #[arg(long = "threads", env = "REKORD_THREADS", global = true)]
    pub threads: Option<usize>,

    /// Log level for the stderr tracing subscriber. `RUST_LOG` takes
    /// priority when set.
    #[arg(long = "log-level", default_value_t = Level::INFO, global = true)]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new repository, printing its generated full and write
    /// passwords.
    Init {
        /// Directory (or bucket/SFTP path) to initialize. Defaults to the
        /// repository URL given via `-R`/`REKORD_REPOSITORY`/the config
        /// file.
        dir: Option<String>,

        /// Full (read+write) password. Prompted for if omitted.
        #[arg(long, env = "REKORD_FULL_PASSWORD", hide_env_values = true)]
        full_password: Option<String>,

        /// Write-only password. Prompted for if omitted.
        #[arg(long, env = "REKORD_WRITE_PASSWORD", hide_env_values = true)]
        write_password: Option<String>,
    },

    /// Store a snapshot of one or more paths.
    Put {
        /// Paths to back up.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Overrides the generated snapshot name.
        #[arg(short = 'n', long)]
        name: Option<String>,

        /// Follow symlinks and store their targets' content instead of a
        /// symlink entry.
        #[arg(long)]
        follow_symlinks: bool,

        /// Store exactly one path as a single object, with no enclosing
        /// snapshot or tag.
        #[arg(long)]
        raw: bool,
    },

    /// Restore an object (a snapshot, or any object id) to disk.
    Get {
        /// Object id to restore (a 64-character hex string).
        oid: String,

        /// Destination directory (for a snapshot/directory) or file (for a
        /// single file/chunk object).
        #[arg(short = 'O', long = "output")]
        destination: PathBuf,

        /// Collapse each restored root to its final path component rather
        /// than recreating its full stored subpath.
        #[arg(long)]
        flat: bool,
    },

    /// List snapshots, oldest first.
    List,
}
