//! Judge identity resolution.
//!
//! The chat/OAuth layer hands the core an opaque token when a judge connects;
//! the resolver turns it into a stable judge id and display name. The core
//! never inspects tokens itself.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// A judge currently connected to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJudge {
    pub judge_id: String,
    pub name: String,
}

/// Trait the hosting service implements on top of its account system.
#[async_trait]
pub trait JudgeDirectory: Send + Sync {
    /// Resolve an opaque token to a judge identity.
    async fn resolve(&self, token: &str) -> Result<ActiveJudge>;
}

/// Fixed token table, used by tests and local development.
#[derive(Default)]
pub struct StaticJudgeDirectory {
    judges: HashMap<String, ActiveJudge>,
}

impl StaticJudgeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judge(mut self, token: &str, judge_id: &str, name: &str) -> Self {
        self.judges.insert(
            token.to_string(),
            ActiveJudge {
                judge_id: judge_id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl JudgeDirectory for StaticJudgeDirectory {
    async fn resolve(&self, token: &str) -> Result<ActiveJudge> {
        self.judges
            .get(token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown judge token {}", token)))
    }
}
