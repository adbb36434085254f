//! Encrypted-at-rest configuration.
//!
//! Layout:
//! - `secret_key.rs`: key file loading (and generation for the sealing tool)
//! - `fernet.rs`: token codec for the encrypted blob
//! - `config_file.rs`: in-memory decryption, INI parsing, `[database]` extraction

pub mod config_file;
pub mod fernet;
pub mod secret_key;

pub use config_file::{
    DatabaseProfile, ParsedConfig, database_section, decrypt_config, load_profile, read_blob,
};
pub use secret_key::{SecretKey, load_key, store_key};

use std::path::{Path, PathBuf};

/// True when the key file and the encrypted blob resolve to the same directory.
pub fn shares_directory(key_path: &Path, blob_path: &Path) -> bool {
    resolved_parent(key_path) == resolved_parent(blob_path)
}

fn resolved_parent(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .or_else(|_| std::path::absolute(parent))
        .unwrap_or_else(|_| parent.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_dotted_names_share_the_working_directory() {
        assert!(shares_directory(
            Path::new("./secret.key"),
            Path::new("config.ini.enc")
        ));
    }

    #[test]
    fn absolute_and_relative_forms_of_one_directory_match() {
        let cwd = std::env::current_dir().unwrap();
        assert!(shares_directory(
            &cwd.join("secret.key"),
            Path::new("config.ini.enc")
        ));
    }

    #[test]
    fn indirect_paths_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        let key = dir.path().join("secret.key");
        let blob = dir.path().join("conf").join("..").join("config.ini.enc");
        assert!(shares_directory(&key, &blob));
    }

    #[test]
    fn separate_directories_do_not_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keys")).unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        assert!(!shares_directory(
            &dir.path().join("keys/secret.key"),
            &dir.path().join("conf/config.ini.enc")
        ));
    }
}
