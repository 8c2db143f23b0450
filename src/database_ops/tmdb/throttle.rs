use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use super::config::TmdbCrawlConfig;

#[derive(Clone, Debug)]
pub struct ThrottleSettings {
    pub min_delay: Duration,
    pub start_delay: Duration,
    pub max_delay: Duration,
    pub target_concurrency: f64,
    pub adaptive: bool,
}

impl ThrottleSettings {
    pub fn from_config(cfg: &TmdbCrawlConfig) -> Self {
        Self {
            min_delay: cfg.min_delay(),
            start_delay: Duration::from_millis(cfg.autothrottle_start_delay_ms),
            max_delay: Duration::from_millis(cfg.autothrottle_max_delay_ms),
            target_concurrency: cfg.autothrottle_target_concurrency,
            adaptive: cfg.autothrottle,
        }
    }

    fn initial_delay(&self) -> Duration {
        if self.adaptive {
            self.start_delay.max(self.min_delay).min(self.max_delay.max(self.min_delay))
        } else {
            self.min_delay
        }
    }
}

/// Next spacing after observing one response.
///
/// Moves halfway toward `latency / target_concurrency`, never below that target, and clamps
/// into `[min_delay, max_delay]`. A failed response may raise the delay but never lower it.
/// A target that does not fit in a `Duration` is treated as `max_delay`.
pub fn adjust_delay(
    settings: &ThrottleSettings,
    current: Duration,
    latency: Duration,
    success: bool,
) -> Duration {
    let ceiling = settings.max_delay.max(settings.min_delay);
    let target = Duration::try_from_secs_f64(latency.as_secs_f64() / settings.target_concurrency)
        .map(|t| t.min(ceiling))
        .unwrap_or(ceiling);
    let averaged = current.min(ceiling) / 2 + target / 2;
    let next = averaged.max(target).max(settings.min_delay).min(ceiling);
    if !success && next <= current {
        return current;
    }
    next
}

struct ThrottleState {
    delay: Duration,
    next_allowed: Instant,
}

/// Process-wide spacing between request starts, shared by every chain.
#[derive(Clone)]
pub struct AdaptiveThrottle {
    settings: ThrottleSettings,
    state: Arc<Mutex<ThrottleState>>,
}

impl AdaptiveThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        let state = ThrottleState {
            delay: settings.initial_delay(),
            next_allowed: Instant::now(),
        };
        Self {
            settings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Reserve the next request slot and sleep until it opens.
    pub async fn wait(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let wait_until = if now >= state.next_allowed {
            now
        } else {
            state.next_allowed
        };
        let sleep_duration = wait_until.saturating_duration_since(now);
        state.next_allowed = wait_until + state.delay;
        drop(state);

        if !sleep_duration.is_zero() {
            sleep(sleep_duration).await;
        }
    }

    /// Feed a response latency back into the delay. No-op when adaptation is off.
    pub async fn observe(&self, latency: Duration, success: bool) {
        if !self.settings.adaptive {
            return;
        }
        let mut state = self.state.lock().await;
        let next = adjust_delay(&self.settings, state.delay, latency, success);
        if next != state.delay {
            debug!(
                previous_ms = state.delay.as_millis() as u64,
                next_ms = next.as_millis() as u64,
                latency_ms = latency.as_millis() as u64,
                "throttle delay adjusted"
            );
            state.delay = next;
        }
    }

    pub async fn current_delay(&self) -> Duration {
        self.state.lock().await.delay
    }
}
