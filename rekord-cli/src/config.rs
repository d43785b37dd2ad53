//! Config-file loading: `[Repository]`/`[S3]`/`[SFTP]` sections, merged with
//! environment variables and CLI flags (flags > env > file).
//!
//! Grounded on `examples/original_source/src/rekord/config.cc`'s
//! `rk_LoadConfig`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone)]
pub struct FileConfig {
    pub repository: Option<String>,
    pub threads: Option<usize>,
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_keyfile: Option<String>,
}

impl FileConfig {
    /// Loads `path` if given, else the default `~/.config/rekord/config.ini`
    /// if it exists. A missing default file is not an error; a missing file
    /// explicitly named with `-C` is.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(FileConfig::default()),
            },
        };

        let ini = ini::Ini::load_from_file(&path).with_context(|| format!("reading config file {}", path.display()))?;

        let repository = section_get(&ini, "Repository", "url");
        let threads = section_get(&ini, "Repository", "threads").and_then(|v| v.parse().ok());
        let aws_region = section_get(&ini, "S3", "region");
        let aws_access_key_id = section_get(&ini, "S3", "access_key_id");
        let aws_secret_access_key = section_get(&ini, "S3", "secret_access_key");
        let ssh_password = section_get(&ini, "SFTP", "password");
        let ssh_keyfile = section_get(&ini, "SFTP", "keyfile").map(|keyfile| resolve_relative(&path, &keyfile));

        Ok(FileConfig {
            repository,
            threads,
            aws_region,
            aws_access_key_id,
            aws_secret_access_key,
            ssh_password,
            ssh_keyfile,
        })
    }

    /// Sets the backend-consumed environment variables (`AWS_*`, `SSH_*`)
    /// from this config, but only where the process environment doesn't
    /// already have them — an explicitly set env var always wins over the
    /// config file.
    pub fn apply_to_env(&self) {
        set_if_absent("AWS_REGION", &self.aws_region);
        set_if_absent("AWS_ACCESS_KEY_ID", &self.aws_access_key_id);
        set_if_absent("AWS_SECRET_ACCESS_KEY", &self.aws_secret_access_key);
        set_if_absent("SSH_PASSWORD", &self.ssh_password);
        set_if_absent("SSH_KEYFILE", &self.ssh_keyfile);
    }
}

fn set_if_absent(var: &str, value: &Option<String>) {
    if std::env::var_os(var).is_none() {
        if let Some(value) = value {
            std::env::set_var(var, value);
        }
    }
}

fn section_get(ini: &ini::Ini, section: &str, key: &str) -> Option<String> {
    ini.section(Some(section)).and_then(|props| props.get(key)).map(str::to_string)
}

/// A keyfile path in the config file is relative to the config file's own
/// directory, matching `rk_LoadConfig`'s handling of `SFTP.keyfile`.
fn resolve_relative(config_path: &Path, value: &str) -> String {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        return value.to_string();
    }
    match config_path.parent() {
        Some(dir) => dir.join(candidate).to_string_lossy().into_owned(),
        None => value.to_string(),
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rekord").join("config.ini"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_default_config_is_not_an_error() {
        let config = FileConfig::load(None).unwrap();
        assert!(config.repository.is_none());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(FileConfig::load(Some(Path::new("/nonexistent/rekord.ini"))).is_err());
    }

    #[test]
    fn reads_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[Repository]\nurl = s3://example.com/bucket\nthreads = 12\n\n[S3]\nregion = us-east-1\n\n[SFTP]\npassword = hunter2\n"
        )
        .unwrap();
        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.repository.as_deref(), Some("s3://example.com/bucket"));
        assert_eq!(config.threads, Some(12));
        assert_eq!(config.aws_region.as_deref(), Some("us-east-1"));
        assert_eq!(config.ssh_password.as_deref(), Some("hunter2"));
    }
}
