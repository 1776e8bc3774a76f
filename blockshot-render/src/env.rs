//! Execution environment lifecycle.
//!
//! An [`Environment`] wraps one [`Host`] and walks it through
//! `Uninitialized -> Launching -> ReadyCheck -> Ready`, failing into
//! `Failed` on a launch error or readiness timeout. [`Environment::teardown`]
//! moves any state to `Closed` exactly once.
//!
//! [`EnvironmentManager`] hands out environments per job. By default every
//! job gets a fresh one; with `reuse` enabled a released environment is reset
//! and parked for the next job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blockshot_benchmark::RenderMetrics;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::engine::RendererOptions;
use crate::host::{CORE_GLOBALS, Host, HostError, HostFactory, RESOURCES_GLOBAL, VIEWER_GLOBAL};
use crate::session::RenderSession;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to launch environment: {0}")]
    Launch(#[source] HostError),
    #[error("environment not ready after {attempts} attempts, missing {missing:?}")]
    ReadinessTimeout { attempts: u32, missing: Vec<String> },
    #[error("environment host error: {0}")]
    Host(#[from] HostError),
    #[error("environment is not ready (state {0:?})")]
    NotReady(EnvState),
    #[error("environment is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Abort polling early once this much time has passed.
    pub deadline: Option<Duration>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            interval: Duration::from_millis(100),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32, missing: Vec<String> },
}

/// Poll until every name in `required` is a loaded global.
///
/// Sleeps `interval` between attempts, never after the last one, so a
/// timeout is reported within `max_attempts * interval`.
pub async fn poll_ready(
    host: &mut dyn Host,
    required: &[&str],
    policy: &ReadinessPolicy,
) -> Result<Readiness, HostError> {
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut missing = Vec::new();

    for attempt in 1..=max_attempts {
        missing.clear();
        for &name in required {
            if !host.has_global(name).await? {
                missing.push(name.to_string());
            }
        }
        log::debug!("Readiness attempt {}/{}: missing {:?}", attempt, max_attempts, missing);
        if missing.is_empty() {
            return Ok(Readiness::Ready { attempts: attempt });
        }
        if attempt == max_attempts {
            break;
        }
        if let Some(deadline) = policy.deadline {
            if started.elapsed() + policy.interval > deadline {
                return Ok(Readiness::TimedOut { attempts: attempt, missing });
            }
        }
        tokio::time::sleep(policy.interval).await;
    }

    Ok(Readiness::TimedOut {
        attempts: max_attempts,
        missing,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Uninitialized,
    Launching,
    ReadyCheck,
    Ready,
    Failed,
    Closed,
}

pub struct Environment {
    host: Box<dyn Host>,
    state: EnvState,
    policy: ReadinessPolicy,
    metrics: Arc<RenderMetrics>,
    atlas_loaded: bool,
}

impl Environment {
    pub fn new(host: Box<dyn Host>, policy: ReadinessPolicy, metrics: Arc<RenderMetrics>) -> Self {
        Self {
            host,
            state: EnvState::Uninitialized,
            policy,
            metrics,
            atlas_loaded: false,
        }
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn has_atlas(&self) -> bool {
        self.atlas_loaded
    }

    fn ensure_ready(&self) -> Result<(), EnvError> {
        match self.state {
            EnvState::Ready => Ok(()),
            EnvState::Closed => Err(EnvError::Closed),
            other => Err(EnvError::NotReady(other)),
        }
    }

    async fn await_globals(&mut self, required: &[&str]) -> Result<(), EnvError> {
        match poll_ready(self.host.as_mut(), required, &self.policy).await {
            Ok(Readiness::Ready { attempts }) => {
                self.metrics.record_readiness(attempts, false);
                log::info!("Environment ready for {:?} after {} attempt(s)", required, attempts);
                Ok(())
            }
            Ok(Readiness::TimedOut { attempts, missing }) => {
                self.metrics.record_readiness(attempts, true);
                self.state = EnvState::Failed;
                log::warn!("Environment readiness timed out after {} attempts, missing {:?}", attempts, missing);
                Err(EnvError::ReadinessTimeout { attempts, missing })
            }
            Err(e) => {
                self.state = EnvState::Failed;
                Err(EnvError::Host(e))
            }
        }
    }

    /// Launch the host and wait for the engine and viewer to load.
    /// Starting a ready environment is a no-op.
    pub async fn start(&mut self) -> Result<(), EnvError> {
        match self.state {
            EnvState::Ready => return Ok(()),
            EnvState::Uninitialized => {}
            _ => return self.ensure_ready(),
        }

        self.state = EnvState::Launching;
        self.metrics.record_env_launch();
        if let Err(e) = self.host.launch().await {
            self.state = EnvState::Failed;
            log::error!("Environment launch failed: {}", e);
            return Err(EnvError::Launch(e));
        }

        self.state = EnvState::ReadyCheck;
        self.await_globals(&CORE_GLOBALS).await?;
        if let Err(e) = self.host.load_module(VIEWER_GLOBAL).await {
            self.state = EnvState::Failed;
            return Err(EnvError::Host(e));
        }
        self.await_globals(&[VIEWER_GLOBAL]).await?;

        self.state = EnvState::Ready;
        Ok(())
    }

    /// Install the texture atlas and wait until the host reports it.
    pub async fn load_atlas(&mut self, data_url: String) -> Result<(), EnvError> {
        self.ensure_ready()?;
        self.host.load_atlas(data_url).await?;
        self.await_globals(&[RESOURCES_GLOBAL]).await?;
        self.atlas_loaded = true;
        Ok(())
    }

    pub fn session(&mut self, options: RendererOptions) -> Result<RenderSession<'_>, EnvError> {
        self.ensure_ready()?;
        Ok(RenderSession::new(self.host.as_mut(), self.metrics.clone(), options))
    }

    pub async fn surface_count(&mut self) -> Result<usize, EnvError> {
        if self.state == EnvState::Closed {
            return Err(EnvError::Closed);
        }
        Ok(self.host.surface_count().await?)
    }

    /// Clear model and surfaces so the next job starts from a clean host.
    pub async fn reset(&mut self) -> Result<(), EnvError> {
        self.ensure_ready()?;
        self.host.reset().await?;
        Ok(())
    }

    /// Close the host. Safe to call more than once; only the first call
    /// does anything.
    pub async fn teardown(&mut self) -> Result<(), EnvError> {
        if self.state == EnvState::Closed {
            return Ok(());
        }
        let previous = self.state;
        let result = self.host.close().await;
        self.state = EnvState::Closed;
        self.atlas_loaded = false;
        self.metrics.record_env_teardown();
        log::info!("Environment torn down (was {:?})", previous);
        result.map_err(EnvError::Host)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if !matches!(self.state, EnvState::Closed | EnvState::Uninitialized) {
            log::warn!("Environment dropped without teardown (state {:?})", self.state);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub reuse: bool,
    pub readiness: ReadinessPolicy,
}

pub struct EnvironmentManager {
    factory: Arc<dyn HostFactory>,
    config: EnvConfig,
    metrics: Arc<RenderMetrics>,
    idle: Mutex<Option<Environment>>,
}

impl EnvironmentManager {
    pub fn new(factory: Arc<dyn HostFactory>, config: EnvConfig, metrics: Arc<RenderMetrics>) -> Self {
        Self {
            factory,
            config,
            metrics,
            idle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.metrics
    }

    /// A parked environment when reuse is on, otherwise a fresh one.
    pub async fn acquire(&self) -> Environment {
        if self.config.reuse {
            if let Some(env) = self.idle.lock().await.take() {
                log::debug!("Reusing parked environment");
                return env;
            }
        }
        Environment::new(
            self.factory.create(),
            self.config.readiness.clone(),
            self.metrics.clone(),
        )
    }

    /// Give an environment back once a job is done with it.
    pub async fn release(&self, mut env: Environment) -> Result<(), EnvError> {
        if self.config.reuse && env.state() == EnvState::Ready {
            match env.reset().await {
                Ok(()) => {
                    let mut idle = self.idle.lock().await;
                    if idle.is_none() {
                        *idle = Some(env);
                        return Ok(());
                    }
                }
                Err(e) => log::warn!("Environment reset failed, tearing down: {}", e),
            }
        }
        env.teardown().await
    }

    /// Tear down the parked environment, if any.
    pub async fn shutdown(&self) -> Result<(), EnvError> {
        let parked = self.idle.lock().await.take();
        match parked {
            Some(mut env) => env.teardown().await,
            None => Ok(()),
        }
    }
}
