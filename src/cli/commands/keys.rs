use anyhow::Context;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::json;
use std::io::BufRead;

use crate::auth::hash_password;
use crate::cli::{utils, OutputFormat};

const MIN_SECRET_BYTES: usize = 32;

pub fn keygen(bytes: usize, output_format: OutputFormat) -> anyhow::Result<()> {
    if bytes < MIN_SECRET_BYTES {
        anyhow::bail!("refusing to generate a secret shorter than {} bytes", MIN_SECRET_BYTES);
    }
    let mut raw = vec![0u8; bytes];
    OsRng.fill_bytes(&mut raw);
    let secret = URL_SAFE_NO_PAD.encode(&raw);

    match output_format {
        OutputFormat::Json => utils::output_success(output_format, "Secret generated", Some(json!({ "secret": secret }))),
        OutputFormat::Text => {
            println!("JWT_SECRET={}", secret);
            Ok(())
        }
    }
}

pub fn hash(password: Option<String>, output_format: OutputFormat) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let hash = hash_password(&password)?;
    match output_format {
        OutputFormat::Json => utils::output_success(output_format, "Password hashed", Some(json!({ "hash": hash }))),
        OutputFormat::Text => {
            println!("{}", hash);
            Ok(())
        }
    }
}
