use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "ingest-cli")]
#[command(about = "Client for the instance ingestion live-view API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,
    /// Show the server version
    Version,
    /// Follow logs captured for a guest instance
    Tail {
        /// Instance id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = reqwest::get(format!("{}/api/health", base)).await?;
            print_response(res).await?;
        }
        Commands::Version => {
            let res = reqwest::get(format!("{}/api/version", base)).await?;
            print_response(res).await?;
        }
        Commands::Tail { id } => tail(&stream_url(base, &id)).await?,
    }

    Ok(())
}

fn stream_url(base: &str, id: &str) -> String {
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/api/instances/{}/stream", ws_base, id)
}

async fn tail(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (socket, _) = connect_async(url).await?;
    eprintln!("Connected to {}", url);
    let (_, mut incoming) = socket.split();

    while let Some(message) = incoming.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", text.as_str()),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    eprintln!("Stream closed");
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
