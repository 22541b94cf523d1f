//! Configuration: a TOML file plus `ESCROW__`-prefixed environment overrides,
//! same `config`-crate shape as the teacher.

pub mod defaults;
pub mod loader;

pub use defaults::EscrowConfig;
pub use loader::load_configuration;
