//! `conclave status` — Show configuration and stored sessions.

use conclave_config::AppConfig;
use conclave_core::ToolRegistry;
use conclave_orchestrator::Orchestrator;
use conclave_providers::OpenAiCompatProvider;
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let endpoint = provider.base_url().to_string();
    let orchestrator = Orchestrator::new(&config, provider, ToolRegistry::new())?;
    orchestrator.store().load_from(&AppConfig::sessions_path())?;

    let status = orchestrator.status();
    let o = orchestrator.config();

    println!("Conclave Status");
    println!("===============");
    println!("  Config dir:      {}", AppConfig::config_dir().display());
    println!("  Endpoint:        {endpoint}");
    println!("  API key:         {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Model:           {}", config.default_model);
    println!("  Temperature:     {}", config.default_temperature);
    println!("  Max parallel:    {}", o.max_parallel);
    println!("  Loop:            {} iterations, threshold {}", o.loop_max_iterations, o.convergence_threshold);
    println!("  Timeout:         {}s per invocation", o.invocation_timeout_secs);
    println!("  Agents:          {}", status.total_agents);
    for (id, state) in &status.agents {
        println!("    - {id} ({state})");
    }
    println!("  Sessions:        {} active, {} archived", status.active_sessions, status.archived_sessions);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `conclave onboard` first");
    }

    Ok(())
}
