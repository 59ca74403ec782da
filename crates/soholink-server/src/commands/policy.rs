//! Policy inspection and dry-run evaluation.

use anyhow::Result;
use chrono::Utc;
use console::style;

use soholink_core::policy::{AuthzInput, PolicyEngine};
use soholink_core::Config;

pub fn list(config: &Config) -> Result<()> {
    let engine = PolicyEngine::load(&config.policy.directory)?;

    println!("Policy directory: {}", config.policy.directory.display());
    println!("Policy hash:      {}", engine.policy_hash());
    println!();
    for file in engine.policy_files() {
        println!("  {file}");
    }

    Ok(())
}

pub fn test(
    config: &Config,
    user: &str,
    identifier: &str,
    role: &str,
    resource: &str,
) -> Result<()> {
    let engine = PolicyEngine::load(&config.policy.directory)?;

    let input = AuthzInput {
        user: user.to_string(),
        identifier: identifier.to_string(),
        role: role.to_string(),
        authenticated: true,
        nas_address: String::new(),
        resource: resource.to_string(),
        timestamp: Utc::now(),
        attributes: Default::default(),
    };

    println!("Input:");
    println!("{}", serde_json::to_string_pretty(&input)?);
    println!();

    let result = engine.evaluate(&input)?;
    if result.allow {
        println!("Result: {}", style("ALLOW").green().bold());
    } else {
        println!("Result: {}", style("DENY").red().bold());
        for reason in &result.deny_reasons {
            println!("  - {reason}");
        }
    }

    Ok(())
}
