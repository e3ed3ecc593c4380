use aa_cli::{Cli, Commands, Parser};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let db = cli.db.as_deref();
    match cli.command {
        Commands::Run(args) => args.run(db).await,
        Commands::Resume(args) => args.run(db).await,
        Commands::Cancel => aa_cli::automation::cancel(db).await,
        Commands::Status => aa_cli::automation::status(db).await,
        Commands::Sessions => aa_cli::automation::sessions(db),
        Commands::Delete(args) => args.run(db).await,
        Commands::Logs(args) => args.run(db),
        Commands::Purge(args) => args.run(db).await,
    }
}
