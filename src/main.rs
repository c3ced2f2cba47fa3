use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use heirvault::commitment::{self, Normalization};
use heirvault::config::VaultConfig;
use heirvault::crypto::cipher::CipherMode;
use heirvault::error::VaultError;
use heirvault::pipeline;
use heirvault::restore;
use heirvault::sharing::{self, SharingConfig};
use heirvault::vault::{StorageEnvelope, VaultPayload};

#[derive(Parser)]
#[command(name = "heirvault")]
#[command(about = "Client-side encrypted inheritance vaults with threshold key sharing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SharingArgs {
    /// Shares needed to reconstruct
    #[arg(long, env = "HEIRVAULT_THRESHOLD")]
    threshold: Option<u8>,
    /// Shares generated
    #[arg(long, env = "HEIRVAULT_SHARES")]
    shares: Option<u8>,
    /// Use AES-256-GCM instead of AES-256-CBC for the payload
    #[arg(long)]
    aead: bool,
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

impl SharingArgs {
    fn resolve(&self) -> Result<VaultConfig, VaultError> {
        let mut config = match &self.config {
            Some(path) => VaultConfig::from_json(&fs::read_to_string(path)?)?,
            None => VaultConfig::default(),
        };
        config.sharing = SharingConfig {
            threshold: self.threshold.unwrap_or(config.sharing.threshold),
            total_shares: self.shares.unwrap_or(config.sharing.total_shares),
        };
        if self.aead {
            config.cipher_mode = CipherMode::Gcm;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a payload and split its key into shares
    Prepare {
        /// Vault payload JSON
        #[arg(long)]
        payload: PathBuf,
        #[command(flatten)]
        sharing: SharingArgs,
    },
    /// Re-prepare an edited payload as the next version of a vault
    Edit {
        #[arg(long)]
        payload: PathBuf,
        /// Current storage envelope JSON
        #[arg(long)]
        envelope: PathBuf,
        #[command(flatten)]
        sharing: SharingArgs,
    },
    /// Combine shares and decrypt a vault
    Open {
        #[arg(long)]
        envelope: PathBuf,
        #[arg(long = "share", required = true)]
        shares: Vec<String>,
    },
    /// Print a vault's security questions
    Questions {
        #[arg(long)]
        envelope: PathBuf,
    },
    /// Check answers against a vault's security questions
    Answer {
        #[arg(long)]
        envelope: PathBuf,
        #[arg(long = "answer", required = true)]
        answers: Vec<String>,
    },
    /// Split a hex secret into shares
    Split {
        #[arg(long)]
        secret_hex: String,
        #[command(flatten)]
        sharing: SharingArgs,
    },
    /// Combine shares into a hex secret
    Combine {
        #[arg(long = "share", required = true)]
        shares: Vec<String>,
    },
    /// Commit to a security answer
    Commit {
        #[arg(long)]
        answer: String,
    },
    /// Check an answer against a commitment
    Verify {
        #[arg(long)]
        answer: String,
        #[arg(long)]
        commitment: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("heirvault=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare { payload, sharing } => {
            let payload: VaultPayload = read_json(&payload)?;
            let prepared = pipeline::prepare_vault(&payload, &sharing.resolve()?)?;
            print_json(&prepared)?;
        }
        Commands::Edit {
            payload,
            envelope,
            sharing,
        } => {
            let payload: VaultPayload = read_json(&payload)?;
            let envelope = read_envelope(&envelope)?;
            let prepared = pipeline::prepare_vault_edit(&payload, &sharing.resolve()?, &envelope)?;
            print_json(&prepared)?;
        }
        Commands::Open { envelope, shares } => {
            let envelope = read_envelope(&envelope)?;
            let payload = restore::open_vault(&envelope, &shares)?;
            print_json(&payload)?;
        }
        Commands::Questions { envelope } => {
            let envelope = read_envelope(&envelope)?;
            for (i, question) in restore::security_questions(&envelope)?.iter().enumerate() {
                println!("{}. {question}", i + 1);
            }
        }
        Commands::Answer { envelope, answers } => {
            let envelope = read_envelope(&envelope)?;
            let results = restore::verify_answers(&envelope, &answers, Normalization::Default)?;
            print_json(&results)?;
        }
        Commands::Split {
            secret_hex,
            sharing,
        } => {
            let secret = hex::decode(secret_hex.trim())
                .map_err(|e| VaultError::InvalidInput(format!("secret hex: {e}")))?;
            for share in sharing::split(&secret, &sharing.resolve()?.sharing)? {
                println!("{share}");
            }
        }
        Commands::Combine { shares } => {
            let secret = sharing::combine(&shares)?;
            println!("{}", hex::encode(secret.as_bytes()));
        }
        Commands::Commit { answer } => {
            println!("{}", commitment::commit(&answer, Normalization::Default)?);
        }
        Commands::Verify { answer, commitment } => {
            let ok = commitment::verify(&answer, &commitment, Normalization::Default);
            println!("{}", if ok { "match" } else { "mismatch" });
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, VaultError> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| VaultError::Serialization(e.to_string()))
}

fn read_envelope(path: &Path) -> Result<StorageEnvelope, VaultError> {
    StorageEnvelope::from_bytes(&fs::read(path)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), VaultError> {
    let out =
        serde_json::to_string_pretty(value).map_err(|e| VaultError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}
