//! Access token discovery.
//!
//! Looks at the `--token` flag (which clap also fills from
//! `QUIP_ACCESS_TOKEN`), then at `~/.quip_token`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use docmirror_common::AccessToken;

/// Name of the token file in the home directory.
pub const TOKEN_FILE_NAME: &str = ".quip_token";

/// Default location of the token file.
pub fn token_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(TOKEN_FILE_NAME))
}

/// Resolve the access token from the flag/environment value or the token file.
pub fn resolve(explicit: Option<&str>) -> Result<AccessToken> {
    resolve_from(explicit, token_file().as_deref())
}

fn resolve_from(explicit: Option<&str>, file: Option<&Path>) -> Result<AccessToken> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return AccessToken::new(token).context("Invalid access token");
    }

    if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(mut contents) => {
                let token = AccessToken::new(contents.as_str());
                contents.zeroize();
                return token.with_context(|| format!("Invalid access token in {}", path.display()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        }
    }

    bail!(
        "No access token found. Pass --token, set QUIP_ACCESS_TOKEN, or store it in ~/{}",
        TOKEN_FILE_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_token_wins() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(TOKEN_FILE_NAME);
        std::fs::write(&file, "from-file").unwrap();

        let token = resolve_from(Some("from-flag"), Some(&file)).unwrap();
        assert_eq!(token.expose(), "from-flag");
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(TOKEN_FILE_NAME);
        std::fs::write(&file, "  from-file\n").unwrap();

        let token = resolve_from(None, Some(&file)).unwrap();
        assert_eq!(token.expose(), "from-file");
    }

    #[test]
    fn test_blank_flag_falls_back_to_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(TOKEN_FILE_NAME);
        std::fs::write(&file, "from-file").unwrap();

        let token = resolve_from(Some("   "), Some(&file)).unwrap();
        assert_eq!(token.expose(), "from-file");
    }

    #[test]
    fn test_missing_token() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(TOKEN_FILE_NAME);

        let err = resolve_from(None, Some(&file)).unwrap_err();
        assert!(err.to_string().contains("No access token"));
    }

    #[test]
    fn test_empty_token_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(TOKEN_FILE_NAME);
        std::fs::write(&file, "\n").unwrap();

        assert!(resolve_from(None, Some(&file)).is_err());
    }
}
