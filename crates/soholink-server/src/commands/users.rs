//! User management commands.

use anyhow::{bail, Result};
use console::style;

use soholink_core::Config;
use soholink_crypto::keys::{generate_keypair, save_signing_key};
use soholink_crypto::{credential, encode_did_key};
use soholink_store::Store;

pub async fn add(config: &Config, username: &str, role: &str) -> Result<()> {
    config.ensure_directories()?;
    let store = Store::open(&config.database_path()).await?;

    if let Some(existing) = store.get_user_by_username(username).await? {
        bail!(
            "user '{username}' already exists (identifier: {})",
            existing.identifier
        );
    }

    let key = generate_keypair();
    let public = key.verifying_key();
    let identifier = encode_did_key(&public);

    store
        .add_user(username, &identifier, public.as_bytes(), role)
        .await?;

    let key_path = config.keys_dir().join(format!("{username}.pem"));
    save_signing_key(&key_path, &key)?;

    // A ready-to-use token so the operator can smoke-test immediately.
    let token = credential::encode(username, &key)?;

    store.close().await;

    println!("{}", style("User created").green().bold());
    println!();
    println!("Username:    {username}");
    println!("Identifier:  {identifier}");
    println!("Role:        {role}");
    println!("Private key: {}", key_path.display());
    println!();
    println!("Sample credential token (for testing):");
    println!("  {token}");
    println!();
    println!("Test with radclient:");
    println!(
        "  echo \"User-Name={username},User-Password={token}\" | radclient -x localhost:1812 auth testing123"
    );

    Ok(())
}

pub async fn list(config: &Config) -> Result<()> {
    let store = Store::open(&config.database_path()).await?;
    let users = store.list_users().await?;
    store.close().await;

    if users.is_empty() {
        println!("No users found. Add one with: soholink users add <username>");
        return Ok(());
    }

    println!(
        "{:<16} {:<28} {:<10} {:<8} {}",
        style("USERNAME").bold(),
        style("IDENTIFIER").bold(),
        style("ROLE").bold(),
        style("STATUS").bold(),
        style("CREATED").bold()
    );

    for user in &users {
        let status = if user.is_revoked() {
            style("REVOKED").red().to_string()
        } else {
            style("active").green().to_string()
        };

        let mut identifier = user.identifier.clone();
        if identifier.len() > 24 {
            identifier.truncate(24);
            identifier.push_str("...");
        }

        println!(
            "{:<16} {:<28} {:<10} {:<8} {}",
            user.username,
            identifier,
            user.role,
            status,
            user.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("Total: {} users", users.len());
    Ok(())
}

pub async fn revoke(config: &Config, username: &str, reason: &str) -> Result<()> {
    let store = Store::open(&config.database_path()).await?;

    let Some(user) = store.get_user_by_username(username).await? else {
        bail!("user '{username}' not found");
    };

    store.revoke_user(username, reason).await?;
    store.close().await;

    println!("{}", style(format!("User '{username}' has been revoked")).yellow());
    println!("Reason:     {reason}");
    println!("Identifier: {}", user.identifier);
    println!();
    println!("The revocation takes effect immediately for new authentication attempts.");

    Ok(())
}
