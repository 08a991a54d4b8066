use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "warden-cli")]
#[command(about = "Management CLI for proxy-warden", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000", env = "WARDEN_URL")]
    url: String,

    /// Bearer token, when the server has one configured.
    #[arg(short, long, env = "WARDEN_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Composite engine status
    Status,
    /// Show the proxy list, or replace it from a file (`-` for stdin)
    Proxies {
        #[arg(long)]
        set: Option<PathBuf>,
    },
    /// Show or change selection policy
    Settings {
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        max_retries: Option<i64>,
        #[arg(long)]
        timeout: Option<i64>,
        #[arg(long)]
        concurrency: Option<i64>,
    },
    /// Show or replace connectivity-check targets
    TestUrls {
        #[arg(long = "set", num_args = 1..)]
        set: Option<Vec<String>>,
    },
    /// Request one URL through the engine
    Test { url: String },
    /// Start the engine
    Start,
    /// Stop the engine
    Stop,
    /// Restart the engine
    Restart,
    /// Print retained log entries
    Logs,
    /// Drop retained log entries
    ClearLogs,
    /// Follow the live log stream
    Tail,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/').to_string();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
    }
    let api = |path: &str| format!("{}/api/{}", base, path);

    let res = match cli.command {
        Commands::Status => client.get(api("status")).headers(headers).send().await?,
        Commands::Proxies { set: None } => client.get(api("proxies")).headers(headers).send().await?,
        Commands::Proxies { set: Some(path) } => {
            let text = read_input(&path)?;
            client
                .post(api("proxies"))
                .headers(headers)
                .json(&json!({ "proxyList": text }))
                .send()
                .await?
        }
        Commands::Settings { strategy, max_retries, timeout, concurrency } => {
            let mut patch = serde_json::Map::new();
            if let Some(v) = strategy {
                patch.insert("strategy".into(), json!(v));
            }
            if let Some(v) = max_retries {
                patch.insert("maxRetries".into(), json!(v));
            }
            if let Some(v) = timeout {
                patch.insert("timeout".into(), json!(v));
            }
            if let Some(v) = concurrency {
                patch.insert("concurrency".into(), json!(v));
            }
            if patch.is_empty() {
                client.get(api("settings")).headers(headers).send().await?
            } else {
                client.post(api("settings")).headers(headers).json(&patch).send().await?
            }
        }
        Commands::TestUrls { set: None } => client.get(api("test-urls")).headers(headers).send().await?,
        Commands::TestUrls { set: Some(urls) } => {
            client
                .post(api("test-urls"))
                .headers(headers)
                .json(&json!({ "testUrls": urls }))
                .send()
                .await?
        }
        Commands::Test { url } => {
            client
                .get(api("test"))
                .headers(headers)
                .query(&[("url", url)])
                .send()
                .await?
        }
        Commands::Start => client.post(api("service/start")).headers(headers).send().await?,
        Commands::Stop => client.post(api("service/stop")).headers(headers).send().await?,
        Commands::Restart => client.post(api("service/restart")).headers(headers).send().await?,
        Commands::Logs => client.get(api("logs")).headers(headers).send().await?,
        Commands::ClearLogs => client.delete(api("logs")).headers(headers).send().await?,
        Commands::Tail => return tail(&base, cli.key.as_deref()).await,
    };

    print_response(res).await
}

fn read_input(path: &PathBuf) -> std::io::Result<String> {
    if path.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin());
    }
    std::fs::read_to_string(path)
}

async fn tail(base: &str, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let ws_base = base
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    let mut url = url::Url::parse(&format!("{}/ws/logs", ws_base))?;
    if let Some(key) = key {
        url.query_pairs_mut().append_pair("token", key);
    }

    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                match value["type"].as_str() {
                    Some("history") => {
                        for entry in value["data"].as_array().into_iter().flatten() {
                            print_entry(entry);
                        }
                    }
                    Some("log") => print_entry(&value["data"]),
                    _ => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

fn print_entry(entry: &Value) {
    println!(
        "{} {:<6} {}",
        entry["timestamp"].as_str().unwrap_or("-"),
        entry["level"].as_str().unwrap_or("-"),
        entry["message"].as_str().unwrap_or("")
    );
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: management API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
