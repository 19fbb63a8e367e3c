//! Parley command line. The `trust-txt` subcommand generates, validates,
//! and discovers `/.well-known/trust.txt` files.
//!
//! Exit codes: 0 on success, 1 on runtime failure, 2 on argument errors
//! (clap's native usage-error code).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corsair_parley::did::HttpClient;
use corsair_parley::trust_txt::{self, TrustTxt};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", version, about = "Corsair Parley compliance attestations")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, validate, and discover trust.txt files.
    #[command(name = "trust-txt", arg_required_else_help = true)]
    TrustTxt {
        #[command(subcommand)]
        action: TrustTxtAction,
    },
}

#[derive(Subcommand)]
enum TrustTxtAction {
    /// Render a trust.txt from flags and optionally scanned CPOE files.
    Generate {
        /// The publishing organization's DID.
        #[arg(long)]
        did: String,

        /// A published CPOE URL; repeatable.
        #[arg(long = "cpoe-url")]
        cpoe_urls: Vec<String>,

        /// Catalog URL.
        #[arg(long)]
        catalog: Option<String>,

        /// Comma-separated framework list.
        #[arg(long)]
        frameworks: Option<String>,

        /// Compliance contact.
        #[arg(long)]
        contact: Option<String>,

        /// Directory of local `.jwt` CPOE files to scan.
        #[arg(long)]
        cpoes: Option<PathBuf>,

        /// Rewrite scanned files into absolute URLs under this base.
        #[arg(long = "base-url")]
        base_url: Option<String>,

        /// Write here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate a trust.txt from a URL or local file.
    Validate {
        /// `https://` URL or file path.
        target: String,
    },

    /// Fetch and validate `https://<host>/.well-known/trust.txt`.
    Discover {
        /// The host to discover.
        host: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::TrustTxt { action } => trust_txt_command(action).await,
    }
}

async fn trust_txt_command(action: TrustTxtAction) -> Result<()> {
    match action {
        TrustTxtAction::Generate {
            did,
            mut cpoe_urls,
            catalog,
            frameworks,
            contact,
            cpoes,
            base_url,
            output,
        } => {
            if let Some(dir) = cpoes {
                let scanned = trust_txt::scan_cpoes(&dir, base_url.as_deref())
                    .with_context(|| format!("scanning {}", dir.display()))?;
                cpoe_urls.extend(scanned);
            }

            let trust = TrustTxt {
                did: Some(did),
                cpoes: cpoe_urls,
                catalog,
                frameworks: frameworks
                    .map(|f| f.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                contact,
            };
            let rendered = trust_txt::generate(&trust);

            match output {
                Some(path) => std::fs::write(&path, rendered)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{rendered}"),
            }
            Ok(())
        }

        TrustTxtAction::Validate { target } => {
            let content = if target.starts_with("https://") || target.starts_with("http://") {
                let client = HttpClient::new()?;
                fetch_text(&client, &target).await?
            } else {
                std::fs::read_to_string(&target).with_context(|| format!("reading {target}"))?
            };
            let trust = trust_txt::validate(&content)?;
            println!("valid: {}", trust.did.unwrap_or_default());
            Ok(())
        }

        TrustTxtAction::Discover { host } => {
            let client = HttpClient::new()?;
            let trust = trust_txt::discover(&host, &client).await?;
            print!("{}", trust_txt::generate(&trust));
            Ok(())
        }
    }
}

async fn fetch_text(client: &HttpClient, url: &str) -> Result<String> {
    use corsair_parley::did::HttpFetcher;
    let response = client.get(url).await.map_err(|e| anyhow::anyhow!("fetching {url}: {e}"))?;
    anyhow::ensure!(response.status == 200, "http {} fetching {url}", response.status);
    Ok(String::from_utf8_lossy(&response.body).into_owned())
}
