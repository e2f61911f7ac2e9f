//! `FunnelMail` - scheduled drip-sequence email sender.
//!
//! Each invocation processes one batch; schedule it with cron or a CI timer.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use funnelmail_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "funnelmail=info,funnelmail_core=info,funnelmail_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).await?;

    match cli.command {
        Command::Run(args) => {
            info!("Starting sequence run");
            commands::run(config, &args).await
        }
        Command::Send(args) => commands::send(config, &args).await,
        Command::Subscribe { email, name } => commands::subscribe(&config, &email, &name).await,
        Command::Unsubscribe { email } => commands::unsubscribe(&config, &email).await,
        Command::List => commands::list(&config).await,
        Command::Health => commands::health(),
    }
}
