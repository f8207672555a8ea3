use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use frigate_ptz::config::{self, AppConfig};
use frigate_ptz::{app, logging};

#[derive(Parser)]
#[command(name = "frigate-ptz", version)]
#[command(about = "Patrol and rehome Frigate PTZ cameras without false detections")]
struct Cli {
    /// Config file (default: ./frigate-ptz.toml, optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG / FRIGATE_PTZ_LOG_LEVEL are unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the broker and run schedules until Ctrl-C (default)
    Run,

    /// Validate the configuration and print the camera schedules
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    let cfg = config::load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            print_startup_info(&cfg);
            app::run(cfg).await?;
        }
        Command::CheckConfig => {
            print_startup_info(&cfg);
            println!("Configuration OK.");
        }
    }
    Ok(())
}

fn print_startup_info(cfg: &AppConfig) {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║            FRIGATE PTZ v{:<33}║", env!("CARGO_PKG_VERSION"));
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("  Broker:    {}:{} (root topic {})", cfg.mqtt.host, cfg.mqtt.port, cfg.mqtt.topic_prefix);
    println!(
        "  Timing:    {}ms response timeout, poke every {}s",
        cfg.timing.response_timeout_ms, cfg.timing.poke_interval_secs
    );
    for cam in &cfg.cameras {
        let rehome = if cam.rehome.enabled {
            format!("every {}s → {}", cam.rehome.interval_secs, cam.rehome.preset)
        } else {
            "off".to_string()
        };
        let patrol = if cam.patrol.enabled {
            format!(
                "every {}s → {} (dwell {}s)",
                cam.patrol.interval_secs,
                cam.patrol.route.join(" → "),
                cam.patrol.dwell_secs
            )
        } else {
            "off".to_string()
        };
        println!("  Camera:    {} │ rehome {} │ patrol {}", cam.name, rehome, patrol);
    }
    println!("╚══════════════════════════════════════════════════════════╝");
}
