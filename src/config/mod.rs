//! Configuration loaded from `coffer.toml`.

pub mod settings;

pub use settings::Settings;
