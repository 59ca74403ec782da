//! Node status report.

use anyhow::Result;
use console::style;

use soholink_accounting::{Batcher, Collector};
use soholink_core::Config;
use soholink_store::Store;

pub async fn run(config: &Config) -> Result<()> {
    let store = Store::open(&config.database_path()).await?;

    let identifier = store
        .get_node_info("identifier")
        .await?
        .unwrap_or_else(|| "(not initialized)".to_string());
    let name = store
        .get_node_info("name")
        .await?
        .unwrap_or_else(|| "(not initialized)".to_string());

    let user_count = store.user_count().await?;
    let active_count = store.active_user_count().await?;
    let revocation_count = store.revocation_count().await?;
    store.close().await;

    println!("{}", style("SoHoLINK node status").bold());
    println!();
    println!("Name:        {name}");
    println!("Identifier:  {identifier}");
    println!("Data dir:    {}", config.storage.base_path.display());
    println!("Policies:    {}", config.policy.directory.display());
    println!();
    println!("Users:       {user_count} total, {active_count} active");
    println!("Revocations: {revocation_count}");

    // Today's day-file; its line count is the events recorded so far.
    let collector = Collector::new(&config.accounting_dir())?;
    let current_file = collector.current_file();
    collector.close()?;
    let events_today = std::fs::read_to_string(&current_file)
        .map(|content| content.lines().count())
        .unwrap_or(0);

    println!();
    println!("Accounting:");
    println!("  Current file: {}", current_file.display());
    println!("  Events:       {events_today}");

    let batcher = Batcher::new(
        &config.accounting_dir(),
        &config.merkle_dir(),
        config.merkle.batch_interval(),
    )?;
    match batcher.latest_batch()? {
        Some(batch) => {
            println!();
            println!("Latest Merkle batch:");
            println!("  Source:  {}", batch.source_file);
            println!("  Root:    {}", batch.root_hash);
            println!("  Leaves:  {} (height {})", batch.leaf_count, batch.tree_height);
            println!(
                "  Written: {}",
                batch.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => {
            println!();
            println!("No Merkle batches yet.");
        }
    }

    Ok(())
}
