use anyhow::{Context, Result, bail};
use extract::{GenerationConfig, OllamaClient};
use resilience::{ResilienceConfig, ResilienceOrchestrator, Resilient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(document) = args.next().map(PathBuf::from) else {
        bail!("usage: resilient_extract <file> [config.json]");
    };

    let config = match args.next() {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .context(format!("Failed to read config: {}", path))?;
            ResilienceConfig::from_json(&raw).context("Failed to parse config")?
        }
        None => ResilienceConfig::default(),
    };

    let content = tokio::fs::read_to_string(&document)
        .await
        .context(format!("Failed to read file: {:?}", document))?;

    let client = match std::env::var("OLLAMA_URL") {
        Ok(url) => OllamaClient::new(
            url,
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3".to_string()),
        ),
        Err(_) => OllamaClient::default(),
    };

    let orchestrator = Arc::new(ResilienceOrchestrator::new(config)?);
    let resilient = Resilient::new(client, Arc::clone(&orchestrator));

    tracing::info!(file = ?document, chars = content.chars().count(), "Extracting");

    let outcome = resilient
        .extract(&content, "llm", &GenerationConfig::default())
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!("{}", serde_json::to_string_pretty(&orchestrator.metrics().snapshot())?);

    Ok(())
}
