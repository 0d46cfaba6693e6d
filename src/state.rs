//! # Application State
//!
//! Everything the HTTP handlers and the interview sockets share.
//!
//! ## Layout:
//! - **config**: `Arc<RwLock<AppConfig>>`, read by every new interview, replaced by `PUT /config`
//! - **metrics**: small counters behind their own lock
//! - **store / queue / sweeper**: the analysis backend, already `Send + Sync`
//! - **http**: one pooled `reqwest::Client` for the context and scoring calls
//!
//! The std `RwLock`s are only held for a copy or an increment, never across an `.await`.

use crate::analysis::queue::AnalysisQueue;
use crate::analysis::recovery::RecoverySweeper;
use crate::analysis::store::SessionStore;
use crate::config::AppConfig;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub store: Arc<dyn SessionStore>,
    pub queue: AnalysisQueue,
    pub sweeper: Arc<RecoverySweeper>,
    pub http: reqwest::Client,
    pub start_time: Instant,
}

#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Browser sockets with a live agent conversation
    pub active_interviews: u32,
    pub interviews_started: u64,
    pub interviews_failed: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        queue: AnalysisQueue,
        sweeper: Arc<RecoverySweeper>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            store,
            queue,
            sweeper,
            http,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration.
    ///
    /// A poisoned lock still holds a validated config, so it is read through.
    pub fn get_config(&self) -> AppConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the configuration after validating it.
    ///
    /// ## Returns:
    /// - `Err(message)` when validation fails; the old config stays in place
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        match self.config.write() {
            Ok(mut config) => *config = new_config,
            Err(poisoned) => *poisoned.into_inner() = new_config,
        }
        Ok(())
    }

    /// Reserve a slot for a new interview.
    ///
    /// ## Returns:
    /// - `false` when `performance.max_concurrent_sessions` are already running
    pub fn try_begin_interview(&self) -> bool {
        let limit = self.get_config().performance.max_concurrent_sessions;
        self.with_metrics(|metrics| {
            if metrics.active_interviews as usize >= limit {
                return false;
            }
            metrics.active_interviews += 1;
            metrics.interviews_started += 1;
            true
        })
    }

    pub fn end_interview(&self, failed: bool) {
        self.with_metrics(|metrics| {
            metrics.active_interviews = metrics.active_interviews.saturating_sub(1);
            if failed {
                metrics.interviews_failed += 1;
            }
        })
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.with_metrics(|metrics| metrics.clone())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn with_metrics<T>(&self, f: impl FnOnce(&mut AppMetrics) -> T) -> T {
        match self.metrics.write() {
            Ok(mut metrics) => f(&mut metrics),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(config: AppConfig) -> (AppState, tokio::sync::mpsc::UnboundedReceiver<crate::analysis::queue::AnalysisTask>) {
    use crate::analysis::store::InMemorySessionStore;

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let (queue, rx) = AnalysisQueue::new(store.clone());
    let sweeper = Arc::new(RecoverySweeper::new(store.clone(), queue.clone(), &config.recovery));
    (AppState::new(config, store, queue, sweeper, reqwest::Client::new()), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interview_slots_are_bounded() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let (state, _rx) = test_state(config);

        assert!(state.try_begin_interview());
        assert!(!state.try_begin_interview());
        state.end_interview(true);
        assert!(state.try_begin_interview());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_interviews, 1);
        assert_eq!(metrics.interviews_started, 2);
        assert_eq!(metrics.interviews_failed, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (state, _rx) = test_state(AppConfig::default());
        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        assert_ne!(state.get_config().server.port, 0);
    }
}
