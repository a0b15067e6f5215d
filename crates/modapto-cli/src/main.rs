mod tasks;

use clap::{Parser, Subcommand};

use modapto_types::TaskType;

#[derive(Parser)]
#[command(name = "modapto", about = "MODAPTO smart-service backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server and the task scheduler
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List scheduled tasks stored in the local database
    Tasks {
        /// Task type tag
        #[arg(short = 't', long, default_value = TaskType::ThresholdMaintenance.as_str())]
        task_type: String,

        /// Page number, from zero
        #[arg(long, default_value_t = 0)]
        page: u32,

        /// Page size
        #[arg(long, default_value_t = 20)]
        size: u32,
    },
    /// Check system health
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let config = modapto_config::load_config()?;
                modapto_server::start_server(config, port).await
            })?;
        }
        Commands::Tasks {
            task_type,
            page,
            size,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tasks::run_tasks(task_type, page, size))?;
        }
        Commands::Health => {
            println!("modapto is healthy");
            let config = modapto_config::load_config().unwrap_or_default();
            println!("  server port: {}", config.server.port);
            println!("  registry: {}", config.registry.base_url);
            match config.database_path() {
                Ok(path) => println!("  database: {}", path.display()),
                Err(e) => println!("  database: unavailable ({e})"),
            }

            let rt = tokio::runtime::Runtime::new()?;
            let url = format!("http://127.0.0.1:{}/health", config.server.port);
            match rt.block_on(probe(&url)) {
                Ok(version) => println!("  server: running (version {version})"),
                Err(e) => {
                    tracing::debug!("Health probe failed: {e:#}");
                    println!("  server: not reachable at {url}");
                }
            }
        }
    }

    Ok(())
}

async fn probe(url: &str) -> anyhow::Result<String> {
    let body: serde_json::Value = reqwest::get(url).await?.error_for_status()?.json().await?;
    Ok(body["version"].as_str().unwrap_or("unknown").to_string())
}
