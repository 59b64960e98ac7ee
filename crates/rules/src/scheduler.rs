//! Fixed-interval pass scheduling.
//!
//! [`PassScheduler`] owns the engine and runs one pass per tick. Policy
//! documents are reloaded from disk before every pass, so edits take effect
//! at the next tick without a restart. A pass that overruns its tick skips
//! the missed ticks instead of bursting to catch up.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::EnforcementEngine;
use crate::loader::PolicyLoader;

pub struct PassScheduler {
    engine: EnforcementEngine,
    loader: Option<PolicyLoader>,
    interval: std::time::Duration,
    shutdown: Arc<Notify>,
    max_passes: Option<usize>,
}

impl PassScheduler {
    /// Non-positive intervals fall back to one second.
    pub fn new(engine: EnforcementEngine, interval: Duration) -> Self {
        let interval = interval
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(std::time::Duration::from_secs(1));
        Self {
            engine,
            loader: None,
            interval,
            shutdown: Arc::new(Notify::new()),
            max_passes: None,
        }
    }

    /// Reload policy documents from `loader` before every pass.
    pub fn with_loader(mut self, loader: PolicyLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Stop after `passes` passes.
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes);
        self
    }

    /// Notify this to stop the loop after the current pass.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn engine(&self) -> &EnforcementEngine {
        &self.engine
    }

    /// Load documents and hand the enabled ones to the engine. Returns the
    /// number of files that failed to load.
    pub fn reload_policies(&mut self) -> usize {
        let Some(loader) = &self.loader else {
            return 0;
        };
        match loader.load_all() {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.is_failed()).count();
                if failed > 0 {
                    warn!(failed, dir = %loader.policy_dir().display(), "some policy documents failed to load");
                }
                self.engine.set_policy_documents(loader.enabled_settings());
                failed
            }
            Err(e) => {
                // Keep the documents from the last good load.
                error!(dir = %loader.policy_dir().display(), error = %e, "policy reload failed");
                0
            }
        }
    }

    /// Run until shut down or out of passes, then hand the engine back.
    pub async fn run(mut self) -> EnforcementEngine {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0usize;

        info!(interval_ms = self.interval.as_millis() as u64, "pass scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.notified() => {
                    info!(passes, "pass scheduler shutting down");
                    break;
                }
            }

            self.reload_policies();
            match self.engine.run_pass().await {
                Ok(report) => debug!(
                    violations = report.violations,
                    budget_exhausted = report.budget_exhausted,
                    "scheduled pass finished"
                ),
                Err(e) => error!(error = %e, "pass failed"),
            }
            passes += 1;
            if self.max_passes.is_some_and(|max| passes >= max) {
                info!(passes, "pass limit reached");
                break;
            }
        }
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use postwarden_core::config::{BotConfig, EngineConfig};
    use postwarden_storage::MemoryLedger;

    use super::*;
    use crate::dry_run::DryRunPlatform;
    use crate::loader::PolicyDocument;
    use crate::policy_cache::PolicyCache;

    fn engine(ledger: Arc<MemoryLedger>) -> EnforcementEngine {
        EnforcementEngine::new(
            Arc::new(DryRunPlatform::new()),
            ledger,
            &BotConfig::default(),
            EngineConfig::default(),
            PolicyCache::new(Duration::minutes(60), 0),
        )
    }

    #[tokio::test]
    async fn stops_after_max_passes() {
        let ledger = Arc::new(MemoryLedger::new());
        let scheduler = PassScheduler::new(engine(ledger.clone()), Duration::milliseconds(5)).with_max_passes(3);
        scheduler.run().await;
        // Every pass ends with at least one commit.
        assert!(ledger.commit_count() >= 3);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let ledger = Arc::new(MemoryLedger::new());
        let scheduler = PassScheduler::new(engine(ledger), Duration::seconds(3600));
        let handle = scheduler.shutdown_handle();
        handle.notify_one();
        // The stored permit ends the loop by the second select at the latest.
        let engine = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler did not stop");
        assert_eq!(engine.config().grace_cap, EngineConfig::default().grace_cap);
    }

    #[tokio::test]
    async fn reload_hands_documents_to_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PolicyLoader::new(dir.path().to_path_buf());
        loader
            .write_document(&PolicyDocument::new("pics", Default::default()))
            .unwrap();
        std::fs::write(dir.path().join("broken.yml"), "apiVersion: [").unwrap();

        let ledger = Arc::new(MemoryLedger::new());
        let mut scheduler = PassScheduler::new(engine(ledger), Duration::seconds(60)).with_loader(loader);
        assert_eq!(scheduler.reload_policies(), 1);
        assert!(scheduler.engine().policies.has_document("pics"));
    }
}
