use dotenvy::dotenv;
use mysticbot::config::Settings;
use mysticbot::llm::conversation::DEFAULT_SYSTEM_PROMPT;
use mysticbot::llm::{ChatParams, LlmService};
use mysticbot::logging::init_logging;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Upper bound for one prompt across the whole fallback chain
const CHAT_DEADLINE: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    init_logging().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?;

    info!("Starting MysticBot LLM layer...");

    let settings = init_settings();
    for warning in settings.warnings() {
        warn!("Configuration: {warning}");
    }

    let configs = match settings.provider_configs() {
        Ok(configs) => configs,
        Err(e) => {
            error!("Invalid LLM provider configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        enabled = ?settings.llm_providers_order(),
        "LLM providers with credentials"
    );

    let llm = Arc::new(LlmService::new(&configs));

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        run_health_check(&llm).await;
    } else {
        run_prompt(&llm, &prompt).await;
    }

    llm.close().await;
    Ok(())
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_health_check(llm: &LlmService) {
    let health = llm.health_check().await;
    for name in llm.provider_names() {
        let healthy = health.get(&name).copied().unwrap_or(false);
        if healthy {
            info!(provider = %name, "LLM provider is healthy");
        } else {
            warn!(provider = %name, "LLM provider is unhealthy");
        }
    }
}

async fn run_prompt(llm: &LlmService, prompt: &str) {
    let params = ChatParams::default();
    match tokio::time::timeout(
        CHAT_DEADLINE,
        llm.chat(prompt, DEFAULT_SYSTEM_PROMPT, &params),
    )
    .await
    {
        Ok(Ok(text)) => println!("{text}"),
        Ok(Err(e)) => {
            error!("LLM request failed: {e}");
            println!("{}", e.user_message());
        }
        Err(_) => {
            error!(
                deadline_secs = CHAT_DEADLINE.as_secs(),
                "LLM request timed out"
            );
            println!("{}", mysticbot::llm::UNAVAILABLE_MESSAGE);
        }
    }
}
