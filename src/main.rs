use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recplay::config::Config;
use recplay::replay::{OutputFn, ParameterSet, RecordingLoader, ReplaySession};

#[derive(Parser)]
#[command(
    name = "recplay",
    about = "Replay recorded browser sequences against a control panel",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recording by indexed name or file path
    Replay {
        /// Recording name (indexed from the base directories) or a path to
        /// a recording file
        recording: String,
        /// Additional directories to index recordings from
        #[arg(long)]
        base_dir: Vec<PathBuf>,
        /// Environment parameters as key=value (read-only for recordings)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        /// Capture a screenshot before and after every step
        #[arg(long)]
        screenshots: bool,
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        #[arg(long, default_value_t = 1)]
        delay_factor: u64,
        /// Run with a visible browser window
        #[arg(long)]
        headed: bool,
    },
    /// List indexed recordings
    List {
        #[arg(long)]
        base_dir: Vec<PathBuf>,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    match Cli::parse().command {
        Commands::Replay {
            recording,
            base_dir,
            params,
            screenshots,
            delay_ms,
            delay_factor,
            headed,
        } => {
            let mut config = Config::from_env();
            config.base_dirs.extend(base_dir);
            config.screenshots = config.screenshots || screenshots;
            config.delay_ms = delay_ms;
            config.delay_factor = delay_factor;
            config.headless = config.headless && !headed;

            // A path argument indexes its parent directory and replays the
            // file under its base name
            let path = PathBuf::from(&recording);
            let name = if path.is_file() {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        config.base_dirs.push(parent.to_path_buf());
                    }
                }
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(recording.as_str())
                    .to_string()
            } else {
                recording
            };

            let env_params: ParameterSet = params
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();

            let output: OutputFn =
                Arc::new(|context: &str, message: &str| println!("{} {}", context, message));

            let mut session =
                ReplaySession::open(&config, env_params, None, Some(output)).await?;
            let result = session.replay(&name, ParameterSet::new()).await;
            let close_result = session.close().await;

            let value = result?;
            close_result?;

            if !value.is_null() {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }

        Commands::List { base_dir } => {
            let config = Config::from_env();
            let mut loader = RecordingLoader::new(None);
            for dir in config.base_dirs.iter().chain(base_dir.iter()) {
                loader.scan(dir)?;
            }
            for name in loader.names() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
