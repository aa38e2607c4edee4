//! `haven`: operator command line for the Haven API.
//!
//! Offline commands (`keygen`, `hash-password`, `scan`) need nothing but
//! this binary; `db` and `user` talk to PostgreSQL through `DATABASE_URL`;
//! `blocklist` talks to a running server's admin API.

pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "haven")]
#[command(about = "Haven CLI - operator tooling for the Haven security stack")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Generate a random secret suitable for JWT_SECRET")]
    Keygen {
        #[arg(long, default_value_t = 48, help = "Random bytes before encoding")]
        bytes: usize,
    },

    #[command(about = "Hash a password into an argon2id PHC string")]
    HashPassword {
        #[arg(help = "Password (read from stdin if omitted)")]
        password: Option<String>,
    },

    #[command(about = "Run the threat signatures against a piece of text")]
    Scan {
        #[arg(help = "Text to scan")]
        text: String,
    },

    #[command(about = "Database management")]
    Db {
        #[command(subcommand)]
        cmd: commands::db::DbCommands,
    },

    #[command(about = "User management")]
    User {
        #[command(subcommand)]
        cmd: commands::db::UserCommands,
    },

    #[command(about = "Manage a running server's IP blocklist")]
    Blocklist {
        #[command(flatten)]
        remote: commands::blocklist::RemoteArgs,

        #[command(subcommand)]
        cmd: commands::blocklist::BlocklistCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Keygen { bytes } => commands::keys::keygen(bytes, output_format),
        Commands::HashPassword { password } => commands::keys::hash(password, output_format),
        Commands::Scan { text } => commands::scan::handle(&text, output_format),
        Commands::Db { cmd } => commands::db::handle_db(cmd, output_format).await,
        Commands::User { cmd } => commands::db::handle_user(cmd, output_format).await,
        Commands::Blocklist { remote, cmd } => commands::blocklist::handle(cmd, remote, output_format).await,
    }
}
