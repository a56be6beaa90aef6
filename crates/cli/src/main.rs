use anyhow::Context;
use bookstore_kernel::settings::Settings;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bookstore", version, about = "Bookstore catalog service")]
struct Cli {
    /// Override `database.uri` (mem://<name> or file://<dir>)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server until Ctrl-C
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().with_context(|| "failed to load bookstore settings")?;
    if let Some(uri) = cli.database {
        settings.database.uri = uri;
    }
    bookstore_telemetry::init(&settings.telemetry)?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            bookstore_app::run(settings).await
        }
        Command::Migrate => {
            let applied = bookstore_app::migrate(&settings).await?;
            if applied.is_empty() {
                println!("no pending migrations");
            }
            for key in applied {
                println!("applied {key}");
            }
            tracing::info!(db = %settings.database.uri, "migrate finished");
            Ok(())
        }
    }
}
