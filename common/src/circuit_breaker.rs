// Circuit breaker guarding each destination platform's API. Consecutive
// failures trip the breaker so an unhealthy upstream is rejected fast until
// a cool-down elapses.

use crate::models::Platform;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests are allowed
    Closed,
    /// Requests are rejected until the cool-down elapses
    Open,
    /// Probing whether the upstream recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Cool-down before transitioning from Open to HalfOpen
    pub cooldown: Duration,
    /// Successes in HalfOpen required to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
        }
    }
}

/// Circuit breaker for one upstream, identified by a label used in logs.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    label: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

/// Circuit breaker errors
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker '{label}' is open")]
    CircuitOpen { label: String },

    #[error("Request failed: {0}")]
    RequestFailed(E),
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            state: Arc::new(RwLock::new(BreakerState::new())),
        }
    }

    pub fn with_defaults(label: impl Into<String>) -> Self {
        Self::new(label, CircuitBreakerConfig::default())
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    /// Execute a future behind the breaker. Rejected fast when open.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow_request().await {
            return Err(CircuitBreakerError::CircuitOpen {
                label: self.label.clone(),
            });
        }

        match f.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::RequestFailed(err))
            }
        }
    }

    async fn allow_request(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    info!(
                        circuit_breaker = %self.label,
                        "Circuit breaker transitioning from Open to HalfOpen"
                    );
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(
                        circuit_breaker = %self.label,
                        "Circuit breaker transitioning from HalfOpen to Closed"
                    );
                    *state = BreakerState::new();
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure_time = Some(Instant::now());
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        circuit_breaker = %self.label,
                        failure_count = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning from Closed to Open"
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    circuit_breaker = %self.label,
                    "Circuit breaker transitioning from HalfOpen back to Open"
                );
                state.state = CircuitState::Open;
                state.failure_count = self.config.failure_threshold;
                state.success_count = 0;
                state.last_failure_time = Some(Instant::now());
            }
            CircuitState::Open => {
                state.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Manually reset the breaker to Closed.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!(circuit_breaker = %self.label, "Circuit breaker manually reset to Closed");
        *state = BreakerState::new();
    }
}

/// One breaker per destination platform, created lazily with a shared config.
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<Platform, CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get (or create) the breaker for a platform.
    pub async fn for_platform(&self, platform: Platform) -> CircuitBreaker {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(&platform) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(platform)
            .or_insert_with(|| CircuitBreaker::new(platform.to_string(), self.config.clone()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(threshold: u32, cooldown_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
            success_threshold: 2,
        }
    }

    async fn fail(cb: &CircuitBreaker) {
        let _: Result<(), _> = cb.call(async { Err::<(), &str>("boom") }).await;
    }

    async fn succeed(cb: &CircuitBreaker) -> bool {
        cb.call(async { Ok::<(), &str>(()) }).await.is_ok()
    }

    #[tokio::test]
    async fn test_breaker_starts_closed() {
        let cb = CircuitBreaker::with_defaults("test");
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new("test", config(3, 60_000));

        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_breaker_rejects_fast_when_open() {
        let cb = CircuitBreaker::new("test", config(1, 60_000));
        fail(&cb).await;

        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_breaker_half_open_then_closes() {
        let cb = CircuitBreaker::new("test", config(1, 50));
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        sleep(Duration::from_millis(80)).await;

        assert!(succeed(&cb).await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(succeed(&cb).await);
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_breaker_reopens_on_half_open_failure() {
        let cb = CircuitBreaker::new("test", config(1, 50));
        fail(&cb).await;
        sleep(Duration::from_millis(80)).await;

        assert!(succeed(&cb).await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_when_closed() {
        let cb = CircuitBreaker::new("test", config(3, 60_000));
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.failure_count().await, 2);

        assert!(succeed(&cb).await);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_manager_returns_same_breaker_per_platform() {
        let manager = CircuitBreakerManager::new(config(1, 60_000));

        let first = manager.for_platform(Platform::Instagram).await;
        fail(&first).await;

        let second = manager.for_platform(Platform::Instagram).await;
        assert_eq!(second.state().await, CircuitState::Open);
    }
}
