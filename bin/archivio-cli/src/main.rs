//! ArchivIO CLI - Admin Command Line Interface
//!
//! This binary provides administrative commands for ArchivIO.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archivio_common::types::{NodeId, Provider, RegistrationId, UserId};

#[derive(Parser, Debug)]
#[command(name = "archivio-cli")]
#[command(about = "ArchivIO Admin CLI")]
#[command(version)]
struct Args {
    /// Archive server endpoint
    #[arg(short, long, default_value = "http://localhost:8750")]
    endpoint: String,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive run operations
    Archive {
        #[command(subcommand)]
        action: ArchiveCommands,
    },
    /// Registration queries
    Registration {
        #[command(subcommand)]
        action: RegistrationCommands,
    },
    /// Check server and gateway health
    Health,
}

#[derive(Subcommand, Debug)]
enum ArchiveCommands {
    /// Start an archive run for a registration
    Start {
        /// Registration id
        #[arg(long)]
        registration: String,
        /// Source node id
        #[arg(long)]
        source: String,
        /// Registration title
        #[arg(long)]
        title: String,
        /// Initiating user id
        #[arg(long)]
        initiator: String,
        /// Initiating user email address
        #[arg(long)]
        initiator_email: String,
        /// Parent registration id (for component registrations)
        #[arg(long)]
        parent: Option<String>,
        /// Storage provider to archive (repeat for multiple providers)
        #[arg(long = "provider", required = true)]
        providers: Vec<String>,
        /// Gateway auth cookie
        #[arg(long)]
        cookie: String,
    },
    /// Show the status of an archive run
    Status {
        /// Registration id
        registration: String,
    },
}

#[derive(Subcommand, Debug)]
enum RegistrationCommands {
    /// List registrations stuck past the archive timeout
    Stalled,
}

/// Response body of POST /archives
#[derive(Deserialize)]
struct StartArchiveResponse {
    registration: String,
    status_url: String,
    callback_token: String,
}

/// Response body of GET /archives
#[derive(Deserialize)]
struct ArchiveList {
    registrations: Vec<String>,
}

/// Response body of GET /archives/{id}
#[derive(Deserialize)]
struct StatusReport {
    registration: String,
    source: String,
    title: String,
    initiator: String,
    archiving: bool,
    is_deleted: bool,
    completion: String,
    #[serde(default)]
    archive_provider: Option<String>,
    registered_at: String,
    #[serde(default)]
    archived_at: Option<String>,
    providers: Vec<ProviderReport>,
}

/// Per-provider slice of a status report
#[derive(Deserialize)]
struct ProviderReport {
    provider: String,
    status: String,
    #[serde(default)]
    stat: Option<StatReport>,
    #[serde(default)]
    errors: Vec<String>,
    updated_at: String,
}

/// Rolled-up usage numbers for one provider
#[derive(Deserialize)]
struct StatReport {
    disk_usage: u64,
    num_files: u64,
}

/// Format bytes as a human-readable size string.
fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Overall state line for a status report
fn format_state(report: &StatusReport) -> &'static str {
    if report.is_deleted {
        "failed (tombstoned)"
    } else if report.archiving {
        "archiving"
    } else {
        "archived"
    }
}

/// Turn a failing response into an error with the server's message
async fn response_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("unknown error").to_string();
    anyhow::anyhow!("{}: {}", status, message)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = reqwest::Client::new();

    match args.command {
        Commands::Archive { action } => match action {
            ArchiveCommands::Start {
                registration,
                source,
                title,
                initiator,
                initiator_email,
                parent,
                providers,
                cookie,
            } => {
                // Validate ids locally before going over the wire
                let registration = RegistrationId::new(registration)
                    .map_err(|e| anyhow::anyhow!("Invalid registration id: {}", e))?;
                let source = NodeId::new(source)
                    .map_err(|e| anyhow::anyhow!("Invalid source node id: {}", e))?;
                let initiator = UserId::new(initiator)
                    .map_err(|e| anyhow::anyhow!("Invalid initiator id: {}", e))?;
                let parent = parent
                    .map(|p| {
                        RegistrationId::new(p)
                            .map_err(|e| anyhow::anyhow!("Invalid parent id: {}", e))
                    })
                    .transpose()?;
                for provider in &providers {
                    Provider::new(provider.as_str())
                        .map_err(|e| anyhow::anyhow!("Invalid provider '{}': {}", provider, e))?;
                }

                let body = serde_json::json!({
                    "registration": registration.as_str(),
                    "source": source.as_str(),
                    "title": title,
                    "initiator": initiator.as_str(),
                    "initiator_email": initiator_email,
                    "parent": parent.as_ref().map(RegistrationId::as_str),
                    "providers": providers,
                    "gateway_cookie": cookie,
                });

                let response = client
                    .post(format!("{}/archives", args.endpoint))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to reach server: {}", e))?;

                if !response.status().is_success() {
                    return Err(response_error(response).await);
                }
                let receipt: StartArchiveResponse = response.json().await?;

                println!("Archive run started!");
                println!();
                println!("Registration:   {}", receipt.registration);
                println!("Status URL:     {}", receipt.status_url);
                println!("Callback Token: {}", receipt.callback_token);
                println!();
                println!("Watch progress with:");
                println!(
                    "  archivio-cli -e {} archive status {}",
                    args.endpoint, receipt.registration
                );
            }
            ArchiveCommands::Status { registration } => {
                let response = client
                    .get(format!("{}/archives/{}", args.endpoint, registration))
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to reach server: {}", e))?;

                if !response.status().is_success() {
                    return Err(response_error(response).await);
                }
                let report: StatusReport = response.json().await?;

                println!("Registration: {}", report.registration);
                println!("=============={}", "=".repeat(report.registration.len()));
                println!("Title:        {}", report.title);
                println!("Source:       {}", report.source);
                println!("Initiator:    {}", report.initiator);
                println!("State:        {}", format_state(&report));
                println!("Completion:   {}", report.completion);
                if let Some(archive_provider) = &report.archive_provider {
                    println!("Archived to:  {}", archive_provider);
                }
                println!("Registered:   {}", report.registered_at);
                if let Some(archived_at) = &report.archived_at {
                    println!("Archived:     {}", archived_at);
                }

                println!();
                println!(
                    "{:<16} {:<10} {:>10} {:>7}   {:<28}",
                    "PROVIDER", "STATUS", "SIZE", "FILES", "UPDATED"
                );
                println!("{}", "-".repeat(76));
                for provider in &report.providers {
                    let (size, files) = provider.stat.as_ref().map_or_else(
                        || ("-".to_string(), "-".to_string()),
                        |stat| (format_size(stat.disk_usage), stat.num_files.to_string()),
                    );
                    println!(
                        "{:<16} {:<10} {:>10} {:>7}   {:<28}",
                        provider.provider, provider.status, size, files, provider.updated_at
                    );
                }

                for provider in report.providers.iter().filter(|p| !p.errors.is_empty()) {
                    println!();
                    println!("Errors ({}):", provider.provider);
                    for error in &provider.errors {
                        println!("  - {}", error);
                    }
                }
            }
        },
        Commands::Registration { action } => match action {
            RegistrationCommands::Stalled => {
                let response = client
                    .get(format!("{}/archives", args.endpoint))
                    .query(&[("stalled", "true")])
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to reach server: {}", e))?;

                if !response.status().is_success() {
                    return Err(response_error(response).await);
                }
                let list: ArchiveList = response.json().await?;

                println!("Stalled registrations");
                println!("=====================");
                if list.registrations.is_empty() {
                    println!("No stalled registrations");
                } else {
                    for registration in &list.registrations {
                        println!("{}", registration);
                    }
                }
            }
        },
        Commands::Health => {
            let response = client
                .get(format!("{}/health", args.endpoint))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to reach server: {}", e))?;

            if !response.status().is_success() {
                return Err(response_error(response).await);
            }
            let health: serde_json::Value = response.json().await?;

            println!("Server:        {}", health["status"].as_str().unwrap_or("unknown"));
            println!("Gateway:       {}", health["gateway"].as_str().unwrap_or("unknown"));
            println!(
                "Registrations: {}",
                health["registrations"].as_u64().unwrap_or(0)
            );
        }
    }

    Ok(())
}
