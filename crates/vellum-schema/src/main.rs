//! Vellum Schema Registry server
//!
//! ## Usage
//!
//! ```bash
//! # Standalone primary with in-memory log
//! vellum-schema serve --port 8081
//!
//! # Replica forwarding writes to a primary
//! vellum-schema serve --port 8082 --role following --primary-url http://primary:8081
//!
//! # With authentication
//! vellum-schema serve --auth-file ./auth.json
//! ```

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vellum_schema::auth::Gate;
use vellum_schema::compatibility::StructuralChecker;
use vellum_schema::config::{NodeRole, RegistryConfig};
use vellum_schema::replication::MemoryLog;
use vellum_schema::server::{build_node, SchemaServer};
use vellum_schema::types::CompatibilityLevel;

#[derive(Parser)]
#[command(name = "vellum-schema")]
#[command(
    author,
    version,
    about = "Vellum Schema Registry - replicated schema management"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the schema registry server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8081")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Replication role (leading, following)
        #[arg(long, default_value = "leading")]
        role: NodeRole,

        /// Base URL of the current primary (followers only)
        #[arg(long)]
        primary_url: Option<String>,

        /// Default compatibility level
        #[arg(long, default_value = "BACKWARD")]
        compatibility: CompatibilityLevel,

        /// Auth file with users and ACLs; omit to disable authentication
        #[arg(long)]
        auth_file: Option<std::path::PathBuf>,
    },

    /// Check server health
    Health {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
    },

    /// Register a schema
    Register {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,

        /// Subject name
        #[arg(short, long)]
        subject: String,

        /// Schema type (avro, json, protobuf)
        #[arg(short = 't', long, default_value = "avro")]
        schema_type: String,

        /// Schema file path
        #[arg(short = 'f', long)]
        file: String,
    },

    /// Get schema by ID
    Get {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,

        /// Schema ID
        #[arg(short, long)]
        id: u32,
    },

    /// List subjects
    Subjects {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            role,
            primary_url,
            compatibility,
            auth_file,
        } => {
            let mut config = RegistryConfig::default()
                .with_listen(host, port)
                .with_compatibility(compatibility);
            config.role = role;
            config.primary_url = primary_url;
            config.auth_file = auth_file;
            serve(config).await
        }
        Commands::Health { url } => health_check(&url).await,
        Commands::Register {
            url,
            subject,
            schema_type,
            file,
        } => register_schema(&url, &subject, &schema_type, &file).await,
        Commands::Get { url, id } => get_schema(&url, id).await,
        Commands::Subjects { url } => list_subjects(&url).await,
    }
}

async fn serve(config: RegistryConfig) -> anyhow::Result<()> {
    info!(
        role = ?config.role,
        compatibility = %config.compatibility,
        auth = config.auth_file.is_some(),
        "starting schema registry"
    );

    let gate = match config.load_auth_directory()? {
        Some(directory) => Gate::with_directory(Arc::new(directory)),
        None => Gate::open(),
    };

    let (node, _role_tx) = build_node(
        Arc::new(MemoryLog::new()),
        Arc::new(StructuralChecker::new()),
        &config,
        gate,
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let server = SchemaServer::new(node, config.realm.clone());

    info!("API endpoints:");
    info!("  POST /subjects/{{subject}}/versions - register schema");
    info!("  GET  /schemas/ids/{{id}} - get schema by id");
    info!("  GET  /subjects - list subjects");
    info!("  GET  /subjects/{{subject}}/versions - list versions");
    info!("  GET/PUT /config - compatibility configuration");

    server.run(addr).await
}

async fn health_check(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client.get(format!("{}/health", url)).send().await?;

    if response.status().is_success() {
        let body: serde_json::Value = response.json().await?;
        println!("✓ Schema Registry is healthy");
        println!(
            "  Version: {}",
            body.get("version").unwrap_or(&serde_json::json!("unknown"))
        );
        Ok(())
    } else {
        anyhow::bail!("Schema Registry health check failed: {}", response.status())
    }
}

async fn register_schema(
    url: &str,
    subject: &str,
    schema_type: &str,
    file: &str,
) -> anyhow::Result<()> {
    let schema_content = std::fs::read_to_string(file)?;
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "schemaType": schema_type.to_uppercase(),
        "schema": schema_content,
    });

    let response = client
        .post(format!("{}/subjects/{}/versions", url, subject))
        .json(&body)
        .send()
        .await?;

    if response.status().is_success() {
        let result: serde_json::Value = response.json().await?;
        let id = result.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
        println!("✓ Schema registered");
        println!("  Subject: {}", subject);
        println!("  Schema ID: {}", id);
        Ok(())
    } else {
        let error: serde_json::Value = response.json().await?;
        anyhow::bail!(
            "Failed to register schema: {}",
            error
                .get("message")
                .unwrap_or(&serde_json::json!("Unknown error"))
        )
    }
}

async fn get_schema(url: &str, id: u32) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/schemas/ids/{}", url, id))
        .send()
        .await?;

    if response.status().is_success() {
        let result: serde_json::Value = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    } else {
        anyhow::bail!("Schema not found: {}", id)
    }
}

async fn list_subjects(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client.get(format!("{}/subjects", url)).send().await?;

    if response.status().is_success() {
        let subjects: Vec<String> = response.json().await?;
        println!("Subjects ({}):", subjects.len());
        for subject in subjects {
            println!("  - {}", subject);
        }
        Ok(())
    } else {
        anyhow::bail!("Failed to list subjects")
    }
}
