//! Live contest orchestration core: audience video submissions become an
//! ordered queue, the on-stage entry runs through a judge reveal ceremony,
//! and judge scores roll up into cup and series standings.
//!
//! Transport, auth and persistence live with the hosting service; this crate
//! consumes them through [`store::Store`], [`judges::JudgeDirectory`] and the
//! per-channel event broadcast.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod judges;
pub mod shuffle;
pub mod store;
pub mod types;

pub use channel::{Channel, ChannelRegistry};
pub use config::Settings;
pub use error::{Error, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for the hosting binary.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipcup=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
