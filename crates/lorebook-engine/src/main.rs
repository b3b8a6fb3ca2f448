//! Lorebook engine binary.
//!
//! Runs the reference engine as a standalone process the desktop app can
//! connect to over TCP.

use anyhow::Result;
use clap::Parser;
use lorebook_engine::{EngineServer, LexiconEngine};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lorebook-engine")]
#[command(about = "Reference text-analysis engine for Lorebook")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("starting Lorebook engine");

    let addr = format!("{}:{}", args.host, args.port).parse()?;
    let engine = Arc::new(LexiconEngine::new());
    let mut handle = EngineServer::start_on(addr, engine).await?;

    // The auto-assigned port goes to stdout so a parent process can read it.
    println!("{}", handle.port);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown();

    Ok(())
}
