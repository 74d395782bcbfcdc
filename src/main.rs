mod analysis;
mod cli_adapter;
mod config;
mod conversation;
mod coordinator;
mod gateway;
mod panel;
mod pipeline;
mod prompts;
mod slack_adapter;
mod types;

use anyhow::{Context, Result};
use config::Config;
use coordinator::{ChatSurface, Coordinator};
use gateway::OpenAiGateway;
use pipeline::Pipeline;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "hustlebot.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Chat,
    Slack,
    Help,
}

#[derive(Debug)]
struct RunOptions {
    config_path: PathBuf,
    explicit_config: bool,
    json: bool,
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let _bin = args.remove(0);
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    let subcommand = match parse_subcommand(&args[0]) {
        Ok(subcommand) => subcommand,
        Err(err) => {
            print_usage();
            return Err(err);
        }
    };
    match subcommand {
        Subcommand::Chat => run_surface(&args[1..], false),
        Subcommand::Slack => run_surface(&args[1..], true),
        Subcommand::Help => {
            print_usage();
            Ok(())
        }
    }
}

fn parse_subcommand(arg: &str) -> Result<Subcommand> {
    match arg {
        "chat" => Ok(Subcommand::Chat),
        "slack" => Ok(Subcommand::Slack),
        "help" | "-h" | "--help" => Ok(Subcommand::Help),
        other => Err(anyhow::anyhow!("unknown command: {other}")),
    }
}

fn parse_run_options(args: &[String]) -> Result<Option<RunOptions>> {
    let mut options = RunOptions {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        explicit_config: false,
        json: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let value = args.get(i + 1).context("--config requires a value")?;
                options.config_path = PathBuf::from(value);
                options.explicit_config = true;
                i += 2;
            }
            "--json" => {
                options.json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }
    Ok(Some(options))
}

fn run_surface(args: &[String], slack: bool) -> Result<()> {
    let Some(options) = parse_run_options(args)? else {
        return Ok(());
    };

    // A missing .env is normal; the key may come from the shell or config.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = if options.explicit_config {
        Config::load(&options.config_path)?
    } else {
        Config::load_or_default(&options.config_path)?
    };

    let api_key = config
        .openai
        .resolve_api_key(env::var(config::API_KEY_ENV).ok());
    let gateway = Arc::new(OpenAiGateway::new(&config.openai, api_key));
    let pipeline = Pipeline::new(gateway, config.openai.model.clone(), config.panel.bar_width);
    info!(model = %config.openai.model, slack, "starting hustlebot");

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(async {
        if slack {
            let surface = slack_adapter::SlackAdapter::connect(config.slack()?).await?;
            serve(pipeline, surface, &config).await
        } else {
            let surface = cli_adapter::CliAdapter::spawn(options.json);
            serve(pipeline, surface, &config).await
        }
    });
    // The stdin reader may still be parked on a blocking read.
    runtime.shutdown_background();
    result
}

async fn serve<S: ChatSurface>(pipeline: Pipeline, surface: S, config: &Config) -> Result<()> {
    Coordinator::new(pipeline, surface, config.panel.debug_mode)
        .with_idle_timeout(config.coordinator.idle_timeout())
        .run()
        .await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_usage() {
    eprintln!(
        "hustlebot usage:\n  hustlebot chat [--config <path>] [--json]\n  hustlebot slack [--config <path>]\n\nchat commands: /debug, /reset, /quit"
    );
}
