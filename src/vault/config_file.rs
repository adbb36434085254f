use super::fernet;
use super::secret_key::{SecretKey, load_key};
use crate::config::VaultSettings;
use crate::error::PhaseError;
use ini::{Ini, ParseOption};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DATABASE_SECTION: &str = "database";

const KEY_HOST: &str = "DB_HOST";
const KEY_USER: &str = "DB_USER";
const KEY_PASSWORD: &str = "DB_PASSWORD";
const KEY_SERVICE_NAME: &str = "DB_SERVICE_NAME";
const KEY_PORT: &str = "DB_PORT";

/// Decrypted, parsed config. Lives only in memory.
pub struct ParsedConfig {
    ini: Ini,
}

impl ParsedConfig {
    /// Look up `key` in `section`; keys match case-insensitively.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.ini.section(Some(section)).is_some()
    }
}

impl fmt::Debug for ParsedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections: Vec<_> = self.ini.sections().flatten().collect();
        f.debug_struct("ParsedConfig")
            .field("sections", &sections)
            .finish_non_exhaustive()
    }
}

/// Connection parameters from the `[database]` section.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseProfile {
    pub host: String,
    pub port: u16,
    pub service_name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service_name", &self.service_name)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Decrypt the blob in memory and parse the INI text inside it.
pub fn decrypt_config(key: &SecretKey, blob: &[u8]) -> Result<ParsedConfig, PhaseError> {
    let plaintext = fernet::decrypt(key, blob)?;
    let text = std::str::from_utf8(&plaintext)
        .map_err(|e| PhaseError::ConfigParseFailed(format!("config is not utf-8: {e}")))?;
    // Values are taken literally: no quote stripping, no backslash escapes.
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(text, options)
        .map_err(|e| PhaseError::ConfigParseFailed(e.to_string()))?;
    Ok(ParsedConfig { ini })
}

pub fn database_section(config: &ParsedConfig) -> Result<DatabaseProfile, PhaseError> {
    if !config.has_section(DATABASE_SECTION) {
        return Err(PhaseError::MissingSection(format!(
            "section [{DATABASE_SECTION}]"
        )));
    }
    let required = |key: &str| {
        config
            .get(DATABASE_SECTION, key)
            .map(str::to_string)
            .ok_or_else(|| PhaseError::MissingSection(format!("{DATABASE_SECTION}.{key}")))
    };

    let host = required(KEY_HOST)?;
    let user = required(KEY_USER)?;
    let password = required(KEY_PASSWORD)?;
    let service_name = required(KEY_SERVICE_NAME)?;
    let raw_port = required(KEY_PORT)?;
    let port = raw_port
        .trim()
        .parse::<u16>()
        .map_err(|_| PhaseError::InvalidPort(raw_port.clone()))?;

    Ok(DatabaseProfile {
        host,
        port,
        service_name,
        user,
        password,
    })
}

/// Read the blob at `path`.
pub fn read_blob(path: &Path) -> Result<Vec<u8>, PhaseError> {
    fs::read(path).map_err(|source| PhaseError::BlobUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

/// Full cold path: key file, blob file, decrypt, parse, extract the database profile.
pub fn load_profile(settings: &VaultSettings) -> Result<DatabaseProfile, PhaseError> {
    let key = load_key(&settings.key_path)?;
    let blob = read_blob(&settings.blob_path)?;
    let config = decrypt_config(&key, &blob)?;
    let profile = database_section(&config)?;
    debug!(
        host = %profile.host,
        port = profile.port,
        service = %profile.service_name,
        "database profile decrypted"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FULL_CONFIG: &str = "\
[database]
DB_HOST = 10.0.0.5
DB_USER = twin
DB_PASSWORD = hunter2
DB_SERVICE_NAME = ORCLPDB1
DB_PORT = 1521
";

    fn sealed(key: &SecretKey, text: &str) -> Vec<u8> {
        fernet::encrypt(key, text.as_bytes()).unwrap().into_bytes()
    }

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[test]
    fn matching_key_yields_full_profile() {
        let key = SecretKey::generate();
        let config = decrypt_config(&key, &sealed(&key, FULL_CONFIG)).unwrap();
        let profile = database_section(&config).unwrap();
        assert_eq!(profile.host, "10.0.0.5");
        assert_eq!(profile.user, "twin");
        assert_eq!(profile.password, "hunter2");
        assert_eq!(profile.service_name, "ORCLPDB1");
        assert_eq!(profile.port, 1521);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let key = SecretKey::generate();
        let text = FULL_CONFIG.replace("DB_HOST", "db_host");
        let config = decrypt_config(&key, &sealed(&key, &text)).unwrap();
        assert_eq!(database_section(&config).unwrap().host, "10.0.0.5");
    }

    #[test]
    fn mismatched_key_fails_decryption() {
        let blob = sealed(&SecretKey::generate(), FULL_CONFIG);
        let err = decrypt_config(&SecretKey::generate(), &blob).unwrap_err();
        assert!(matches!(err, PhaseError::DecryptionFailed(_)));
    }

    #[test]
    fn malformed_plaintext_fails_parsing() {
        let key = SecretKey::generate();
        let err = decrypt_config(&key, &sealed(&key, "[database\nDB_HOST = x\n")).unwrap_err();
        assert!(matches!(err, PhaseError::ConfigParseFailed(_)));

        let blob = fernet::encrypt(&key, &[0xff, 0xfe, 0x00]).unwrap().into_bytes();
        let err = decrypt_config(&key, &blob).unwrap_err();
        assert!(matches!(err, PhaseError::ConfigParseFailed(_)));
    }

    #[test]
    fn missing_section_or_key_is_reported() {
        let key = SecretKey::generate();
        let config = decrypt_config(&key, &sealed(&key, "[server]\nport = 80\n")).unwrap();
        let err = database_section(&config).unwrap_err();
        assert!(matches!(err, PhaseError::MissingSection(ref s) if s == "section [database]"));

        let text = FULL_CONFIG.replace("DB_PASSWORD = hunter2\n", "");
        let config = decrypt_config(&key, &sealed(&key, &text)).unwrap();
        let err = database_section(&config).unwrap_err();
        assert!(matches!(err, PhaseError::MissingSection(ref s) if s == "database.DB_PASSWORD"));
    }

    #[test]
    fn values_are_taken_literally() {
        let key = SecretKey::generate();
        let text = FULL_CONFIG.replace("hunter2", r#""p\w:d""#);
        let config = decrypt_config(&key, &sealed(&key, &text)).unwrap();
        assert_eq!(database_section(&config).unwrap().password, r#""p\w:d""#);
    }

    #[test]
    fn non_numeric_port_is_invalid() {
        let key = SecretKey::generate();
        let text = FULL_CONFIG.replace("DB_PORT = 1521", "DB_PORT = fifteen");
        let config = decrypt_config(&key, &sealed(&key, &text)).unwrap();
        let err = database_section(&config).unwrap_err();
        assert!(matches!(err, PhaseError::InvalidPort(ref p) if p == "fifteen"));
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let key = SecretKey::generate();
        let config = decrypt_config(&key, &sealed(&key, FULL_CONFIG)).unwrap();
        let rendered = format!("{:?}", database_section(&config).unwrap());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn loads_blob_written_by_offline_tool() {
        let settings = VaultSettings {
            key_path: fixtures().join("keys/secret.key"),
            blob_path: fixtures().join("blobs/config.ini.enc"),
        };
        let profile = load_profile(&settings).unwrap();
        assert_eq!(profile.host, "db.plant.local");
        assert_eq!(profile.user, "twin_reader");
        assert_eq!(profile.password, "s3cr3t:pa@ss");
        assert_eq!(profile.service_name, "XEPDB1");
        assert_eq!(profile.port, 1521);
    }

    #[test]
    fn missing_blob_is_unavailable() {
        let settings = VaultSettings {
            key_path: fixtures().join("keys/secret.key"),
            blob_path: fixtures().join("blobs/absent.enc"),
        };
        let err = load_profile(&settings).unwrap_err();
        assert!(matches!(err, PhaseError::BlobUnavailable { .. }));
    }
}
