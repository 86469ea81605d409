//! Secret resolution for provider credentials
//!
//! Secrets are delivered either as container-mounted files (Docker/Swarm
//! convention: `/run/secrets/<name_lowercase>`) or as plain environment
//! variables. File-based delivery wins so rotated secrets do not require a
//! rebuilt environment.

use std::path::{Path, PathBuf};

/// Container secrets mount point
const SECRETS_DIR: &str = "/run/secrets";

/// Resolve a secret by name.
///
/// Resolution order:
/// 1. `/run/secrets/<name_lowercase>` (trimmed file contents)
/// 2. the environment variable `<name>`
pub fn get_secret(name: &str) -> Option<String> {
    get_secret_from(Path::new(SECRETS_DIR), name)
}

fn get_secret_from(dir: &Path, name: &str) -> Option<String> {
    let secret_file: PathBuf = dir.join(name.to_lowercase());
    if secret_file.is_file() {
        match std::fs::read_to_string(&secret_file) {
            Ok(raw) => {
                let value = raw.trim();
                if !value.is_empty() {
                    tracing::debug!(secret = name, "Loaded secret from secrets file");
                    return Some(value.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(
                    secret = name,
                    path = %secret_file.display(),
                    error = %e,
                    "Failed to read secrets file"
                );
            }
        }
    }

    match std::env::var(name) {
        Ok(value) if !value.is_empty() => {
            tracing::debug!(secret = name, "Loaded secret from environment");
            Some(value)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file_test_token"), "from-file\n").unwrap();

        // No env var set for this name; file should resolve.
        let value = get_secret_from(dir.path(), "FILE_TEST_TOKEN");
        assert_eq!(value.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_empty_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty_test_token"), "  \n").unwrap();

        assert_eq!(get_secret_from(dir.path(), "EMPTY_TEST_TOKEN"), None);
    }

    #[test]
    fn test_missing_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(get_secret_from(dir.path(), "NO_SUCH_SECRET_ANYWHERE"), None);
    }
}
