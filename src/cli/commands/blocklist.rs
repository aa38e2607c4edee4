use anyhow::Context;
use clap::{Args, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::time::Duration;

use crate::cli::{utils, OutputFormat};

const BLOCKED_IPS_PATH: &str = "/api/admin/security/blocked-ips";

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[arg(long, env = "HAVEN_SERVER", default_value = "http://localhost:3000", help = "Server base URL")]
    pub server: String,

    #[arg(long, env = "HAVEN_TOKEN", hide_env_values = true, help = "Admin bearer token")]
    pub token: String,
}

#[derive(Subcommand)]
pub enum BlocklistCommands {
    #[command(about = "List blocked addresses")]
    List,

    #[command(about = "Block an address")]
    Add {
        #[arg(help = "IPv4 or IPv6 address")]
        ip: IpAddr,
        #[arg(long, help = "Why the address is blocked")]
        reason: String,
        #[arg(long, help = "Block duration in seconds (permanent if omitted)")]
        duration_secs: Option<u64>,
    },

    #[command(about = "Unblock an address")]
    Remove {
        #[arg(help = "IPv4 or IPv6 address")]
        ip: IpAddr,
    },
}

/// Admin API client. Unwraps the `{success, data}` envelope and turns
/// `{success: false}` into an error carrying the server's message.
struct AdminClient {
    http: reqwest::Client,
    base: url::Url,
    token: String,
}

impl AdminClient {
    fn new(remote: RemoteArgs) -> anyhow::Result<Self> {
        let base = url::Url::parse(&remote.server).with_context(|| format!("invalid server URL '{}'", remote.server))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            token: remote.token,
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let url = self.base.join(path).with_context(|| format!("invalid path '{}'", path))?;
        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.context("request failed")?;
        let status = response.status();
        let envelope: Value = response.json().await.context("server returned a non-JSON response")?;

        if status == StatusCode::UNAUTHORIZED {
            anyhow::bail!("token rejected: {}", error_message(&envelope));
        }
        if !status.is_success() || envelope["success"] != json!(true) {
            anyhow::bail!("{} ({})", error_message(&envelope), status);
        }
        Ok(envelope["data"].clone())
    }
}

fn error_message(envelope: &Value) -> &str {
    envelope["error"].as_str().unwrap_or("unknown error")
}

pub async fn handle(cmd: BlocklistCommands, remote: RemoteArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = AdminClient::new(remote)?;

    match cmd {
        BlocklistCommands::List => {
            let entries = client.call(Method::GET, BLOCKED_IPS_PATH, None).await?;
            let entries = entries.as_array().cloned().unwrap_or_default();
            if entries.is_empty() {
                return utils::output_empty_collection(output_format, "blocked_ips", "No blocked addresses");
            }

            match output_format {
                OutputFormat::Json => {
                    utils::output_success(output_format, "Blocked addresses", Some(json!({ "blocked_ips": entries })))
                }
                OutputFormat::Text => {
                    let field = |entry: &Value, key: &str| entry[key].as_str().unwrap_or("-").to_string();
                    let rows: Vec<Vec<String>> = entries
                        .iter()
                        .map(|e| {
                            vec![
                                field(e, "ip"),
                                field(e, "source"),
                                field(e, "expires_at"),
                                field(e, "reason"),
                            ]
                        })
                        .collect();
                    println!("{}", utils::render_table(&["IP", "SOURCE", "EXPIRES", "REASON"], &rows));
                    Ok(())
                }
            }
        }
        BlocklistCommands::Add {
            ip,
            reason,
            duration_secs,
        } => {
            let body = json!({ "ip": ip, "reason": reason, "duration_secs": duration_secs });
            let entry = client.call(Method::POST, BLOCKED_IPS_PATH, Some(body)).await?;
            utils::output_success(output_format, &format!("Blocked {}", ip), Some(json!({ "entry": entry })))
        }
        BlocklistCommands::Remove { ip } => {
            client
                .call(Method::DELETE, &format!("{}/{}", BLOCKED_IPS_PATH, ip), None)
                .await?;
            utils::output_success(output_format, &format!("Unblocked {}", ip), None)
        }
    }
}
