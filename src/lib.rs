pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod router;
pub mod service;
pub mod vault;

pub use error::PhaseError;
pub use service::PhaseService;
pub use vault::{DatabaseProfile, SecretKey};
