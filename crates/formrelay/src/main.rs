//! `formrelay` - CLI for the form relay pipeline
//!
//! Runs the intake endpoint and relay listener, together or as separate
//! processes, and inspects the message store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use formrelay::cli::{Cli, Command, ConfigCommand, MessagesCommand};
use formrelay::{init_logging, lifecycle, Config, Record, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Serve => lifecycle::serve(&config).await?,
        Command::Intake => lifecycle::run_intake(&config).await?,
        Command::Relay => lifecycle::run_relay(&config).await?,
        Command::Messages(cmd) => handle_messages(&config, cmd)?,
        Command::Status(cmd) => handle_status(&config, cmd.json)?,
        Command::Config(cmd) => handle_config(&config, cmd)?,
    }
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<Storage> {
    let uri = config.store_uri();
    Storage::open(&uri).with_context(|| format!("opening store {uri}"))
}

fn handle_messages(config: &Config, cmd: MessagesCommand) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    match cmd {
        MessagesCommand::List { limit, json } => {
            let records = storage.get_recent(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No messages stored.");
            } else {
                for record in &records {
                    println!("{}", plain_line(record));
                }
            }
        }
        MessagesCommand::Show { id, json } => {
            let record = storage
                .get(id)?
                .with_context(|| format!("no message with id {id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Message #{id}");
                for (key, value) in &record.fields {
                    println!("  {key}: {value}");
                }
            }
        }
        MessagesCommand::Count => println!("{}", storage.count()?),
    }
    Ok(())
}

fn plain_line(record: &Record) -> String {
    let fields = record
        .fields
        .iter()
        .filter(|(key, _)| key.as_str() != formrelay::submission::DATE_FIELD)
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "#{:<6} {}  {}",
        record.id.unwrap_or_default(),
        record.date().unwrap_or("-"),
        fields
    )
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "store_uri": storage.uri(),
            "http_address": config.http_addr().to_string(),
            "relay_address": config.relay_addr().to_string(),
            "total_records": stats.total_records,
            "oldest_date": stats.oldest_date,
            "newest_date": stats.newest_date,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("formrelay status");
        println!("----------------");
        println!("Store:         {}", storage.uri());
        println!("HTTP:          {}", config.http_addr());
        println!("Relay:         udp://{}", config.relay_addr());
        println!("Messages:      {}", stats.total_records);
        println!("Oldest:        {}", stats.oldest_date.as_deref().unwrap_or("-"));
        println!("Newest:        {}", stats.newest_date.as_deref().unwrap_or("-"));
        println!("Size (bytes):  {}", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[HTTP]");
                println!("  Address:            {}", config.http_addr());
                println!("  Static root:        {}", config.http.static_root.display());
                println!("  Max body (bytes):   {}", config.http.max_body_bytes);
                println!();
                println!("[Relay]");
                println!("  Address:            {}", config.relay_addr());
                println!("  Chunk size:         {}", config.relay.chunk_size);
                println!();
                println!("[Store]");
                println!("  URI:                {}", config.store_uri());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
