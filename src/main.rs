use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wizard_gateway::client::GatewayClient;
use wizard_gateway::config::GatewayConfig;
use wizard_gateway::error::GatewayError;
use wizard_gateway::models::{AVAILABLE_MODELS, find_model};
use wizard_gateway::relay;
use wizard_gateway::settings::{SettingKey, SettingsStore};
use wizard_gateway::types::ConnectionProfile;

/// Defaults shipped with the binary, applied under the real environment
const BUNDLED_CONFIG: &str = include_str!("../assets/gateway.env");

const DEFAULT_LOG_FILTER: &str = "wizard_gateway=info,tower_http=info";

#[derive(Parser)]
#[command(name = "wizard-gateway", version, about = "Chat relay and community publish gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Send one message through a gateway and stream the reply
    Chat { message: String },
    /// Show or change saved client settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// List selectable models
    Models,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set { key: SettingKey, value: String },
    Unset { key: SettingKey },
}

fn load_dotenv() {
    // A .env file in the working directory wins
    if dotenvy::dotenv().is_ok() {
        return;
    }

    load_bundled_config();
}

fn load_bundled_config() {
    for line in BUNDLED_CONFIG.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            if std::env::var_os(key).is_none() {
                // SAFETY: called from main before the runtime or any other thread starts
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    load_dotenv();
    init_tracing();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli.command.unwrap_or(Command::Serve)))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve => {
            let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
            relay::serve(config).await?;
            Ok(())
        }
        Command::Chat { message } => chat(&message).await,
        Command::Settings { action } => settings(action),
        Command::Models => {
            for model in AVAILABLE_MODELS {
                let marker = if model.recommended { " (recommended)" } else { "" };
                println!("{:<44} {:<22} {}{}", model.id, model.name, model.provider, marker);
            }
            Ok(())
        }
    }
}

async fn chat(message: &str) -> Result<()> {
    let profile = ConnectionProfile::from_env().context("invalid connection profile")?;
    let settings = SettingsStore::open_default().load();
    let client = Arc::new(GatewayClient::from_profile(&profile, &settings)?);

    let health = client
        .check_connection()
        .await
        .with_context(|| format!("gateway at {} is not reachable", client.base_url()))?;
    if !health.configured {
        eprintln!("warning: gateway reports no LLM credential configured");
    }

    let canceller = client.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.abort();
        }
    });

    let mut stdout = std::io::stdout();
    let result = client
        .send_message(message, |delta, _| {
            let _ = write!(stdout, "{delta}");
            let _ = stdout.flush();
        })
        .await;
    ctrl_c.abort();
    println!();

    match result {
        Ok(_) => Ok(()),
        Err(GatewayError::Aborted) => {
            eprintln!("aborted");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn settings(action: SettingsAction) -> Result<()> {
    let store = SettingsStore::open_default();
    let settings = match action {
        SettingsAction::Show => store.load(),
        SettingsAction::Set { key, value } => {
            if key == SettingKey::Model && find_model(value.trim()).is_none() {
                eprintln!("note: '{}' is not in the model list", value.trim());
            }
            store.update(|s| s.set(key, &value))?
        }
        SettingsAction::Unset { key } => store.update(|s| s.unset(key))?,
    };

    println!("# {}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
