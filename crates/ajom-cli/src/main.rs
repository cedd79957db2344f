use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ajom-cli")]
#[command(about = "Accountant job offer monitor command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape all enabled sources once, merge into the master set, and
    /// render the notification body.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = ajom_sync::run_once_from_env().await?;
            println!(
                "run complete: scraped={} new={} master={}",
                summary.scraped, summary.new_today, summary.master_size
            );
            match summary.delta_path {
                Some(path) => println!("new offers file: {}", path.display()),
                None => println!("no new offers today"),
            }
        }
    }

    Ok(())
}
