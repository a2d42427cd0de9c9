use clap::Parser;
use rosetta_imap::plugins::{self, accounts::hash_password};
use rosetta_imap::server::{run_listener, ServerConfig};
use rosetta_imap::logging;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "imapd")]
#[command(version)]
#[command(about = "IMAP4rev1 server with pluggable command handlers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "imapd.toml")]
    config: PathBuf,

    /// Listen address, overrides the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Log every protocol line
    #[arg(short, long)]
    verbose: bool,

    /// Print a sample configuration file
    #[arg(long)]
    sample_config: bool,

    /// Generate an Argon2id password hash for the accounts table
    #[arg(long)]
    hash_password: bool,
}

fn prompt(stdin: &mut impl BufRead, label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    stdin.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn hash_password_interactive() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut stdin = io::stdin().lock();

    // Input is echoed; this is meant for provisioning, not shared terminals
    let password = prompt(&mut stdin, "Enter password: ")?;
    if password.is_empty() {
        return Err("Password cannot be empty".into());
    }
    let confirm = prompt(&mut stdin, "Confirm password: ")?;
    if password != confirm {
        return Err("Passwords do not match".into());
    }

    let hash = hash_password(&password).map_err(|e| format!("Error hashing password: {}", e))?;
    println!();
    println!("Add this to your config under [accounts.users.\"your@email.com\"]:");
    println!("password_hash = \"{}\"", hash);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    if cli.sample_config {
        println!("{}", ServerConfig::sample()?);
        return Ok(());
    }
    if cli.hash_password {
        return hash_password_interactive();
    }

    logging::init(cli.verbose);

    let mut config = ServerConfig::load(&cli.config).await?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let registry = plugins::default_registry(&config).await?;
    let settings = config.session_settings();

    let listener = TcpListener::bind(&config.listen).await?;
    tracing::info!("{} ready ({} accounts)", config.hostname, config.accounts.users.len());

    tokio::select! {
        result = run_listener(listener, Arc::new(settings), Arc::new(registry)) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    Ok(())
}
