use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use log::{info, LevelFilter};
use tokio_util::sync::CancellationToken;

use mailbox::mail_reader::{display, fetch, imap, FetchOptions, ParseOptions, TransportError};
use mailbox::{logging, settings};

/// Fetches mails from an IMAP folder and prints them as JSON.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "src/resources/settings.yaml")]
    config: PathBuf,

    /// IMAP search term, overrides the settings file
    #[arg(short, long)]
    query: Option<String>,

    /// Only mails that arrived on or after this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level).context("initializing logging")?;

    let config = settings::load_settings(&cli.config)?;
    let password = match &config.imap.password {
        Some(password) => password.clone(),
        None => rpassword::prompt_password("Enter your password: ")?,
    };

    let (mut session, selected) = imap::connect(&config.imap, &password).await?;

    let query = cli.query.unwrap_or(config.search.query);
    let since = cli.since.or(config.search.since);
    let uids = imap::search(&mut session, &query, since).await?;
    info!("{} mails match in {}", uids.len(), selected.name);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let options = FetchOptions {
        channel_capacity: config.fetch.channel_capacity,
        parse: ParseOptions {
            max_depth: config.fetch.max_depth,
        },
    };
    let responses = fetch::fetch_messages(&mut session, &uids, &options, cancel).await?;
    let (messages, errors) =
        display::print_responses(responses, &mut std::io::stdout().lock()).await?;
    info!("{} messages, {} errors", messages, errors);

    // Be nice to the server and log out
    session
        .logout()
        .await
        .map_err(TransportError::Logout)?;
    Ok(())
}
