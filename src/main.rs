use std::path::PathBuf;

use clap::Parser;

use gatenet::service::setup_local_tracing;
use gatenet::{AppResult, Gate, GateConfig, GLOBAL_CONFIG};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    setup_local_tracing()?;

    let commandline = CommandLine::parse();
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let gate_config = GateConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", gate_config);
        return Ok(());
    }

    GLOBAL_CONFIG
        .set(gate_config)
        .expect("set gate config failed");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Gate::start(&rt)
}
