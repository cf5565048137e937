//! `conclave agents` — List the configured agents.

use conclave_agent::{AgentFilter, AgentRegistry};
use conclave_config::AppConfig;
use conclave_core::AgentState;

pub async fn run(
    capability: Option<String>,
    state: Option<AgentState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let registry = AgentRegistry::new(config.orchestrator.max_agents);
    for descriptor in &config.agents {
        let mut descriptor = descriptor.clone();
        if descriptor.model.is_empty() {
            descriptor.model = config.default_model.clone();
        }
        registry.register(descriptor)?;
    }

    let filter = AgentFilter { capability, state };
    let agents = registry.list(&filter);
    if agents.is_empty() {
        println!("No matching agents.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<8} {:<28} Tools", "Id", "Name", "State", "Model");
    for agent in &agents {
        println!(
            "{:<20} {:<24} {:<8} {:<28} {}",
            agent.id,
            agent.name,
            agent.state,
            agent.model,
            agent.tools.join(", ")
        );
    }
    println!("\n  {} agent(s)", agents.len());

    Ok(())
}
