//! Command-line interface for mailscribe.
//!
//! Provides commands for serving the webhook, running a manual pass,
//! seeding and inspecting the cursor, and reading the processing journal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::adapters::{
    ChainedSecrets, DeepgramTranscriber, DirSecrets, EnvSecrets, GmailClient, GmailToken, Mailbox,
    SecretError, SecretSource,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    CheckpointStore, Collaborators, FileCheckpointStore, Journal, ServiceContext,
};
use crate::domain::{Outcome, ProcessingEvent};
use crate::server;

/// Delay between initialization attempts while serving
const INIT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// mailscribe - Voicemail transcription from a mailbox change feed
#[derive(Parser, Debug)]
#[command(name = "mailscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the notification webhook
    Serve {
        /// Address to bind to (defaults to HOST:PORT)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Run one reconciliation pass from the stored cursor
    Reconcile,

    /// Store the mailbox's current tip as the cursor
    Seed,

    /// Show the stored cursor
    Cursor,

    /// Show recent processing journal entries
    Journal {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only show failures
        #[arg(long)]
        failures: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load().context("Failed to load configuration")?;

        match self.command {
            Commands::Serve { address } => serve(&cfg, address).await,
            Commands::Reconcile => reconcile(&cfg).await,
            Commands::Seed => seed(&cfg).await,
            Commands::Cursor => show_cursor(&cfg).await,
            Commands::Journal { limit, failures } => show_journal(&cfg, limit, failures).await,
            Commands::Config => show_config(&cfg),
        }
    }
}

/// Environment first, then the secrets directory if configured
fn secret_source(cfg: &ResolvedConfig) -> ChainedSecrets {
    let mut sources: Vec<Box<dyn SecretSource>> = vec![Box::new(EnvSecrets)];
    if let Some(dir) = &cfg.secrets_dir {
        sources.push(Box::new(DirSecrets::new(dir.clone())));
    }
    ChainedSecrets::new(sources)
}

async fn build_mailbox(cfg: &ResolvedConfig, secrets: &dyn SecretSource) -> Result<GmailClient> {
    let names = &cfg.secret_names;
    let token_json = secrets
        .fetch(&names.gmail_token)
        .await
        .context("Mailbox token is required")?;
    let mut token = GmailToken::from_json(&token_json).context("Invalid mailbox token document")?;

    match secrets.fetch(&names.gmail_credentials).await {
        Ok(credentials) => {
            token = token
                .with_client_credentials(&credentials)
                .context("Invalid OAuth client credentials document")?;
        }
        Err(SecretError::Missing(name)) => {
            info!(secret = %name, "No client credentials; token refresh relies on the token document");
        }
        Err(e) => return Err(e.into()),
    }

    GmailClient::new(
        cfg.mailbox_address.clone(),
        cfg.mailbox_user.clone(),
        token,
        cfg.mailbox_timeout(),
    )
    .context("Failed to build mailbox client")
}

fn checkpoint_store(cfg: &ResolvedConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(cfg.checkpoint_dir(), cfg.mailbox_address.clone())
}

/// Wire collaborators from configuration and secrets
async fn build_context(cfg: &ResolvedConfig) -> Result<Arc<ServiceContext>> {
    let secrets = secret_source(cfg);

    let api_key = secrets
        .fetch(&cfg.secret_names.transcription_key)
        .await
        .context("Transcription API key is required")?;
    let api_key = String::from_utf8(api_key).context("Transcription API key is not UTF-8")?;
    let transcriber = DeepgramTranscriber::new(api_key, cfg.deepgram())
        .context("Failed to build transcription client")?;

    let gmail = Arc::new(build_mailbox(cfg, &secrets).await?);
    let journal = Journal::open(cfg.journal_path()).await?;

    let collaborators = Collaborators {
        mailbox: gmail.clone(),
        sender: gmail,
        transcriber: Arc::new(transcriber),
        checkpoints: Arc::new(checkpoint_store(cfg)),
        journal: Arc::new(journal),
    };

    Ok(Arc::new(ServiceContext::new(
        collaborators,
        cfg.service_settings(),
    )))
}

/// Keep trying to initialize until it succeeds or shutdown starts
async fn initialize_with_retry(context: Arc<ServiceContext>) {
    loop {
        match context.initialize().await {
            Ok(cursor) => {
                info!(%cursor, "Initialized");
                return;
            }
            Err(e) => {
                error!(error = %e, retry_in_secs = INIT_RETRY_DELAY.as_secs(), "Initialization failed");
            }
        }
        if context.is_shutting_down() {
            return;
        }
        tokio::time::sleep(INIT_RETRY_DELAY).await;
    }
}

async fn serve(cfg: &ResolvedConfig, address: Option<String>) -> Result<()> {
    let context = build_context(cfg).await?;
    let address = address.unwrap_or_else(|| cfg.bind_address());

    tokio::spawn(initialize_with_retry(context.clone()));

    let shutdown_context = context.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        shutdown_context.shutdown();
    };

    info!(mailbox = %cfg.mailbox_address, build_version = %cfg.build_version, "Starting mailscribe");
    server::run_server(
        context,
        &address,
        cfg.max_body_bytes,
        cfg.build_version.clone(),
        shutdown,
    )
        .await
        .with_context(|| format!("Server failed on {}", address))
}

async fn reconcile(cfg: &ResolvedConfig) -> Result<()> {
    let context = build_context(cfg).await?;
    context.initialize().await?;
    let report = context.trigger().await?;

    println!("{}", report);
    if report.failures > 0 {
        println!("\nSee `mailscribe journal --failures` for details.");
    }
    Ok(())
}

async fn seed(cfg: &ResolvedConfig) -> Result<()> {
    let secrets = secret_source(cfg);
    let mailbox = build_mailbox(cfg, &secrets).await?;
    let tip = mailbox
        .latest_cursor()
        .await
        .context("Failed to read mailbox tip")?;

    let outcome = checkpoint_store(cfg).save(tip).await?;
    println!("Mailbox: {}", cfg.mailbox_address);
    println!("Tip:     {}", tip);
    println!("Stored:  {}", outcome.stored());
    Ok(())
}

async fn show_cursor(cfg: &ResolvedConfig) -> Result<()> {
    let store = checkpoint_store(cfg);
    match store.document().await? {
        Some(doc) => {
            println!("Mailbox:    {}", doc.mailbox);
            println!("History ID: {}", doc.history_id);
            println!("Updated:    {}", doc.updated_at);
        }
        None => println!("No cursor stored for {} (run `mailscribe seed`)", cfg.mailbox_address),
    }
    Ok(())
}

async fn show_journal(cfg: &ResolvedConfig, limit: usize, failures: bool) -> Result<()> {
    let journal = Journal::open(cfg.journal_path()).await?;
    let events: Vec<ProcessingEvent> = if failures {
        let mut all = journal.failures().await?;
        all.reverse();
        all.truncate(limit);
        all
    } else {
        journal.recent(limit).await?
    };

    if events.is_empty() {
        println!("No journal entries");
        return Ok(());
    }

    println!(
        "{:<20} {:<18} {:<11} {:<9} {}",
        "TIME", "MESSAGE", "STAGE", "OUTCOME", "DETAIL"
    );
    println!("{}", "-".repeat(90));
    for event in events {
        let outcome = match event.outcome {
            Outcome::Succeeded => "ok",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "FAILED",
        };
        let mut detail = event.detail.unwrap_or_default();
        if let Some(attachment) = &event.attachment {
            detail = format!("[{}] {}", attachment, detail);
        }
        if let Some(cursor) = event.cursor {
            detail = format!("cursor {} {}", cursor, detail);
        }
        println!(
            "{:<20} {:<18} {:<11} {:<9} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.message_id,
            format!("{:?}", event.stage).to_lowercase(),
            outcome,
            detail.trim()
        );
    }

    Ok(())
}

/// Show the resolved configuration (secrets are never printed)
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("mailscribe configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using env/defaults)".to_string())
    );
    println!();
    println!("Mailbox:");
    println!("  Address:        {}", cfg.mailbox_address);
    println!("  User:           {}", cfg.mailbox_user);
    println!("  Allowed sender: {}", cfg.allowed_sender);
    println!("  Reply to:       {}", cfg.reply_to);
    println!("  Call timeout:   {}s", cfg.mailbox_timeout_seconds);
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Checkpoints: {}", cfg.checkpoint_dir().display());
    println!("  Journal:     {}", cfg.journal_path().display());
    println!("  Downloads:   {}", cfg.download_dir.display());
    println!();
    println!("Server:");
    println!("  Bind:          {}", cfg.bind_address());
    println!("  Max body size: {} bytes", cfg.max_body_bytes);
    println!();
    println!("Transcription:");
    println!("  Endpoint:     {}", cfg.transcription_endpoint);
    println!("  Model:        {}", cfg.transcription_model);
    println!("  Language:     {}", cfg.transcription_language);
    println!("  Content type: {}", cfg.audio_content_type);
    println!();
    println!("Limits:");
    println!("  Transcription timeout: {}s", cfg.limits.transcription_timeout_seconds);
    println!("  Max attachment size:   {} bytes", cfg.limits.max_attachment_bytes);
    println!("  Dedup capacity:        {}", cfg.dedup_capacity);
    println!("  Re-seed on expiry:     {}", cfg.reseed_on_expired);
    println!();
    println!("Secrets (names only):");
    println!("  Transcription key: {}", cfg.secret_names.transcription_key);
    println!("  Client credentials: {}", cfg.secret_names.gmail_credentials);
    println!("  Token:             {}", cfg.secret_names.gmail_token);
    println!(
        "  Directory:         {}",
        cfg.secrets_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(env only)".to_string())
    );

    Ok(())
}
