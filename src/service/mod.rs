pub mod phase_service;

pub use phase_service::PhaseService;
