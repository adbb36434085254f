//! Offline companion: encrypt a plaintext INI config into the blob the server reads.
//!
//! Generates the key file first when it does not exist yet.

use clap::Parser;
use phase_bridge::vault::{self, SecretKey, fernet};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Parser)]
#[command(name = "seal-config", about = "Encrypt config.ini into config.ini.enc")]
struct Args {
    /// Key file; created when missing.
    #[arg(long, default_value = "secret.key")]
    key: PathBuf,

    /// Plaintext INI config with a [database] section.
    #[arg(long, default_value = "config.ini")]
    input: PathBuf,

    /// Encrypted output blob.
    #[arg(long, default_value = "config.ini.enc")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let key = if args.key.exists() {
        info!(path = %args.key.display(), "secret key loaded");
        vault::load_key(&args.key)?
    } else {
        info!(path = %args.key.display(), "secret key not found; generating a new one");
        let key = SecretKey::generate();
        vault::store_key(&args.key, &key)?;
        key
    };

    let plaintext = Zeroizing::new(fs::read(&args.input)?);
    let token = fernet::encrypt(&key, &plaintext)?;
    fs::write(&args.output, token)?;

    if vault::shares_directory(&args.key, &args.output) {
        warn!("key and encrypted config are in the same directory; move the key before deploying");
    }
    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        "config encrypted"
    );
    Ok(())
}
