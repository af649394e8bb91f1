//! Configuration loading for the swarm host.
//!
//! Config files (`swarm.toml` / `.yaml` / `.json`) are discovered in the
//! working directory and then in `~/.config/swarm/`; `${ENV}` placeholders are
//! substituted before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config, set_config_dir,
    },
    schema::{HashcashConfig, LocaleConfig, ServerConfig, SessionConfig, SwarmConfig, TlsConfig},
};
