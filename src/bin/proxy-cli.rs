use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the adaptive reverse proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "PROXY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy system status
    Status,
    /// List endpoints with original and effective weights
    Endpoints,
    /// Show the weight controller's phase
    Controller,
    /// Add an endpoint to the rotation
    Add {
        /// Endpoint URL, e.g. http://10.0.0.5:8000
        address: String,
        #[arg(short, long, default_value_t = 1)]
        weight: u32,
    },
    /// Remove an endpoint from the rotation
    Remove {
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let endpoints_url = format!("{}/admin/endpoints", cli.url);

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)).send().await?,
        Commands::Endpoints => client.get(&endpoints_url).send().await?,
        Commands::Controller => client.get(format!("{}/admin/controller", cli.url)).send().await?,
        Commands::Add { address, weight } => {
            client
                .post(&endpoints_url)
                .json(&json!({ "address": address, "weight": weight }))
                .send()
                .await?
        }
        Commands::Remove { address } => {
            client
                .delete(&endpoints_url)
                .query(&[("address", address)])
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
