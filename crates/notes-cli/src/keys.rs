//! ed25519 key files.
//!
//! A key file holds the 32-byte secret key as hex on a single line.

use anyhow::{bail, Context, Result};
use ed25519_dalek::SigningKey;
use std::fs;
use std::path::Path;

pub const KEY_FILE: &str = "key";

/// Generate a key and write it to `path`. Refuses to overwrite unless `force`.
pub fn generate(path: &Path, force: bool) -> Result<SigningKey> {
    if path.exists() && !force {
        bail!(
            "Key file {} already exists (pass --force to replace it)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
    fs::write(path, format!("{}\n", hex::encode(key.to_bytes())))
        .with_context(|| format!("Failed to write key file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    Ok(key)
}

/// Load a key written by `generate`.
pub fn load(path: &Path) -> Result<SigningKey> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read key file {} (run `notes keygen` first)",
            path.display()
        )
    })?;

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(contents.trim(), &mut bytes)
        .with_context(|| format!("Key file {} is not 64 hex characters", path.display()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(KEY_FILE);

        let key = generate(&path, false).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(key.to_bytes(), loaded.to_bytes());
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(KEY_FILE);

        let first = generate(&path, false).unwrap();
        assert!(generate(&path, false).is_err());
        assert_eq!(load(&path).unwrap().to_bytes(), first.to_bytes());

        let replaced = generate(&path, true).unwrap();
        assert_ne!(replaced.to_bytes(), first.to_bytes());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(KEY_FILE);
        fs::write(&path, "not a key").unwrap();

        assert!(load(&path).is_err());
        assert!(load(&temp_dir.path().join("missing")).is_err());
    }
}
