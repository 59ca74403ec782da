//! Service wiring and lifecycle.
//!
//! Builds every subsystem from configuration, runs the RADIUS listeners
//! and background maintenance, and drives the orderly shutdown sequence:
//! stop accepting, drain in-flight work under a deadline, close the
//! accounting file, seal one final Merkle batch, close the store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use soholink_accounting::{Batcher, Collector};
use soholink_core::maintenance::{run_log_compactor, run_nonce_pruner, COMPACTOR_INTERVAL};
use soholink_core::pipeline::Pipeline;
use soholink_core::policy::PolicyEngine;
use soholink_core::verifier::Verifier;
use soholink_core::Config;
use soholink_store::Store;

use crate::radius::RadiusServer;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

pub struct App {
    config: Config,
    store: Store,
    accounting: Arc<Collector>,
    batcher: Arc<Batcher>,
    pipeline: Arc<Pipeline>,
}

impl App {
    /// Initialize every subsystem. Fails fast when the policy directory is
    /// empty or the database cannot be opened.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        config.ensure_directories()?;

        let store = Store::open(&config.database_path()).await?;

        let verifier = Verifier::new(
            store.clone(),
            config.auth.credential_ttl(),
            config.auth.clock_skew_tolerance(),
        );

        let policy = Arc::new(PolicyEngine::load(&config.policy.directory)?);
        let accounting = Arc::new(Collector::new(&config.accounting_dir())?);
        let batcher = Arc::new(Batcher::new(
            &config.accounting_dir(),
            &config.merkle_dir(),
            config.merkle.batch_interval(),
        )?);

        let pipeline = Arc::new(Pipeline::new(verifier, policy, Arc::clone(&accounting)));

        Ok(Self {
            config,
            store,
            accounting,
            batcher,
            pipeline,
        })
    }

    /// Serve until SIGINT, then shut down in order.
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_nonce_pruner(
            self.store.clone(),
            self.config.auth.max_nonce_age(),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(run_log_compactor(
            self.config.accounting_dir(),
            self.config.accounting.compress_after(),
            COMPACTOR_INTERVAL,
            shutdown.clone(),
        )));
        {
            let batcher = Arc::clone(&self.batcher);
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move { batcher.start(token).await }));
        }

        let radius = RadiusServer::new(
            self.config.radius.auth_address.clone(),
            self.config.radius.acct_address.clone(),
            self.config.radius.shared_secret.clone(),
            Arc::clone(&self.pipeline),
        );
        let server_token = shutdown.clone();
        let mut server = tokio::spawn(async move { radius.run(server_token).await });

        if self.config.radius.shared_secret.is_empty() {
            warn!("no RADIUS shared secret configured; running in unauthenticated test mode");
        }
        info!(
            data_dir = %self.config.storage.base_path.display(),
            policies = %self.config.policy.directory.display(),
            "SoHoLINK AAA node started"
        );

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
            }
            result = &mut server => {
                // A bind failure or listener crash before any signal.
                shutdown.cancel();
                match result {
                    Ok(Ok(())) => anyhow::bail!("RADIUS server exited unexpectedly"),
                    Ok(Err(e)) => return Err(e),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        shutdown.cancel();

        // Stop accepting and wait for in-flight work, capped by a deadline.
        let drain = async {
            let _ = server.await;
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            warn!("shutdown deadline exceeded, continuing teardown");
        }

        if let Err(e) = self.accounting.close() {
            warn!(error = %e, "accounting close failed");
        }
        if let Err(e) = self.batcher.build_batch() {
            warn!(error = %e, "final Merkle batch failed");
        }
        self.store.close().await;

        info!("shutdown complete");
        Ok(())
    }
}
