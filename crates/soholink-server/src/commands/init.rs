//! Node bootstrap: directories, node identity key, default policy.

use anyhow::Result;
use console::style;

use soholink_core::policy::POLICY_EXTENSION;
use soholink_core::Config;
use soholink_crypto::keys::{generate_keypair, load_signing_key, save_signing_key};
use soholink_crypto::encode_did_key;
use soholink_store::Store;

const DEFAULT_POLICY: &str = include_str!("../../configs/default.policy.json");

pub async fn run(config: &Config) -> Result<()> {
    config.ensure_directories()?;

    // Node identity key: reuse if present, generate otherwise.
    let key_path = config.node_key_path();
    let (node_key, created) = if key_path.exists() {
        (load_signing_key(&key_path)?, false)
    } else {
        let key = generate_keypair();
        save_signing_key(&key_path, &key)?;
        (key, true)
    };
    let node_identifier = encode_did_key(&node_key.verifying_key());

    let node_name = if config.node.name.is_empty() {
        "soholink-node"
    } else {
        &config.node.name
    };

    let store = Store::open(&config.database_path()).await?;
    store.set_node_info("identifier", &node_identifier).await?;
    store.set_node_info("name", node_name).await?;
    store.close().await;

    // Install the default policy only when the directory has none.
    let has_policy = std::fs::read_dir(&config.policy.directory)?.any(|entry| {
        entry
            .ok()
            .and_then(|e| e.file_name().to_str().map(|n| n.ends_with(POLICY_EXTENSION)))
            .unwrap_or(false)
    });
    if !has_policy {
        std::fs::write(
            config.policy.directory.join("default.policy.json"),
            DEFAULT_POLICY,
        )?;
    }

    println!("{}", style("Node initialized").green().bold());
    println!();
    println!("Name:       {node_name}");
    println!("Identifier: {node_identifier}");
    println!(
        "Node key:   {} {}",
        key_path.display(),
        if created { "(generated)" } else { "(existing)" }
    );
    println!("Data dir:   {}", config.storage.base_path.display());
    println!("Policies:   {}", config.policy.directory.display());

    Ok(())
}
