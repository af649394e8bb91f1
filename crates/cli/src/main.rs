mod bootstrap;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {swarm_config::SwarmConfig, swarm_gateway::BotRegistry};

#[derive(Parser)]
#[command(name = "swarm", about = "swarm: host process for bots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Load config from this directory only.
    #[arg(long, global = true, env = "SWARM_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the receptor.
    Gateway {
        #[arg(long)]
        bind: Option<String>,
        /// HTTP port; taken ports fall back to the configured list, then upward.
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        tls_port: Option<u16>,
        /// Serve plain HTTP only.
        #[arg(long, default_value_t = false)]
        no_tls: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file path in use.
    Path,
    /// Print the effective config as TOML.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn apply_overrides(
    config: &mut SwarmConfig,
    bind: Option<String>,
    port: Option<u16>,
    tls_port: Option<u16>,
    no_tls: bool,
) {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.http_port = port;
    }
    if let Some(port) = tls_port {
        config.server.https_port = port;
    }
    if no_tls {
        config.tls.enabled = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        swarm_config::set_config_dir(dir.clone());
    }

    match cli.command {
        Commands::Gateway {
            bind,
            port,
            tls_port,
            no_tls,
        } => {
            let mut config = swarm_config::discover_and_load();
            apply_overrides(&mut config, bind, port, tls_port, no_tls);

            let data = bootstrap::prepare(&swarm_config::data_dir())?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                instance = %data.instance,
                data_dir = %data.root.display(),
                "swarm starting"
            );

            // Bots are linked in by the embedding binary; a bare host serves
            // only the built-in routes.
            swarm_gateway::start_gateway(config, BotRegistry::new()).await
        },
        Commands::Config { action } => match action {
            ConfigAction::Path => {
                println!("{}", swarm_config::find_or_default_config_path().display());
                Ok(())
            },
            ConfigAction::Show => {
                let config = swarm_config::discover_and_load();
                let rendered =
                    toml::to_string_pretty(&config).context("failed to render config")?;
                println!("{rendered}");
                Ok(())
            },
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut config = SwarmConfig::default();
        apply_overrides(&mut config, Some("127.0.0.1".into()), Some(8080), None, true);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.https_port, 7788);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn cli_parses_gateway_flags() {
        let cli = Cli::try_parse_from(["swarm", "gateway", "--port", "9000", "--no-tls"]).unwrap();
        match cli.command {
            Commands::Gateway { port, no_tls, .. } => {
                assert_eq!(port, Some(9000));
                assert!(no_tls);
            },
            Commands::Config { .. } => panic!("wrong subcommand"),
        }
    }
}
