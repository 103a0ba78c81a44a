//! Channel settings, parsed once from the environment into a typed struct.
//!
//! The hosting process historically carried these as loose `"true"`/`"false"`
//! strings; everything is normalized here at the boundary so the core only
//! ever sees typed values.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether new submissions are accepted when a channel starts up
    pub queue_open: bool,
    /// Maximum active entries across the channel, 0 = unlimited
    pub max_queue_size: usize,
    /// Maximum active entries per submitter
    pub per_user_limit: usize,
    /// Minimum time between accepted submissions from the same submitter
    pub submission_cooldown: Duration,
    /// Buffer size of the per-channel event broadcast
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_open: true,
            max_queue_size: 0,
            per_user_limit: 2,
            submission_cooldown: Duration::from_secs(60),
            event_capacity: 100,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let settings = Self {
            queue_open: env_flag("QUEUE_OPEN", defaults.queue_open),
            max_queue_size: env_number("QUEUE_MAX_SIZE", defaults.max_queue_size),
            per_user_limit: env_number("QUEUE_PER_USER_LIMIT", defaults.per_user_limit),
            submission_cooldown: Duration::from_secs(env_number(
                "QUEUE_COOLDOWN_SECS",
                defaults.submission_cooldown.as_secs(),
            )),
            event_capacity: env_number("EVENT_BUFFER", defaults.event_capacity),
        };

        tracing::info!(
            queue_open = settings.queue_open,
            max_queue_size = settings.max_queue_size,
            per_user_limit = settings.per_user_limit,
            cooldown_secs = settings.submission_cooldown.as_secs(),
            "Channel settings loaded"
        );

        settings
    }
}
