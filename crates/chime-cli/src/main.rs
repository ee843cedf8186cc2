use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chime_core::api::{fetch_devices, DEFAULT_API_BASE};
use chime_core::{Camera, CameraBuilder, CameraConfig, HttpRestClient, RestClient};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod watch;
#[cfg(test)]
mod watch_tests;

#[derive(Debug, Parser)]
#[command(name = "chimectl")]
#[command(about = "Camera and doorbell state, snapshots and controls")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, env = "CHIME_TOKEN")]
    token: Option<String>,

    #[arg(long)]
    camera_id: u64,

    #[arg(long, default_value_t = 5000)]
    ding_poll_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    Info,
    Snapshot {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        allow_stale: bool,
    },
    Health,
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long)]
        favorites: bool,
    },
    RecordingUrl {
        ding_id: String,
    },
    Light {
        #[arg(value_enum)]
        state: Toggle,
    },
    Siren {
        #[arg(value_enum)]
        state: Toggle,
    },
    Watch {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn is_on(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let rest: Arc<dyn RestClient> = Arc::new(HttpRestClient::new(cli.api_base.clone(), cli.token.clone())?);
    let camera = load_camera(rest.clone(), cli.camera_id).await?;

    match cli.command {
        Command::Info => {
            let state = camera.device().current();
            let out = serde_json::json!({
                "device": &*state,
                "name": camera.name(),
                "model": state.model(),
                "doorbot": camera.is_doorbot(),
                "has_light": camera.has_light(),
                "has_siren": camera.has_siren(),
                "has_battery": state.has_battery(),
                "battery_level": state.battery_level(),
                "low_battery": state.has_low_battery(),
                "offline": state.is_offline(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Snapshot { out, allow_stale } => {
            let image = camera.snapshot(allow_stale).await?;
            tokio::fs::write(&out, &image)
                .await
                .with_context(|| format!("writing snapshot to {}", out.display()))?;
            info!(path = %out.display(), bytes = image.len(), "snapshot saved");
        }
        Command::Health => {
            let health = camera.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::History { limit, favorites } => {
            let history = camera.history(limit, favorites).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::RecordingUrl { ding_id } => {
            println!("{}", camera.recording_url(&ding_id).await?);
        }
        Command::Light { state } => {
            if !camera.set_light(state.is_on()).await? {
                return Err(anyhow!("{} has no light", camera.name()));
            }
        }
        Command::Siren { state } => {
            if !camera.set_siren(state.is_on()).await? {
                return Err(anyhow!("{} has no siren", camera.name()));
            }
        }
        Command::Watch { format } => {
            let poll_interval = Duration::from_millis(cli.ding_poll_ms);
            watch::run_watch(&camera, rest.as_ref(), poll_interval, format).await?;
        }
    }

    Ok(())
}

async fn load_camera(rest: Arc<dyn RestClient>, camera_id: u64) -> Result<Camera> {
    let listing = fetch_devices(rest.as_ref()).await?;
    let (state, is_doorbot) = listing
        .find(camera_id)
        .ok_or_else(|| anyhow!("no camera with id {camera_id} on this account"))?;
    info!(camera_id, kind = %state.kind, "camera found");

    let camera = CameraBuilder::new(state.clone(), rest)
        .doorbot(is_doorbot)
        .config(CameraConfig::default())
        .build()?;
    Ok(camera)
}
