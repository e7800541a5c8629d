use log::warn;
use serde::{Deserialize, Serialize};

use crate::{engines::BackendKind, errors::Result};

/// Environment variable holding a comma separated backend priority.
pub const PRIORITY_ENV: &str = "TERRASCAN_PROCESSOR_PRIORITY";

/// Host supplied settings for a [crate::ProcessorManager].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Replaces the default priority when set and non-empty.
    pub priority: Option<Vec<String>>,
}

impl ManagerConfig {
    pub fn with_priority<S: Into<String>>(priority: impl IntoIterator<Item = S>) -> Self {
        Self {
            priority: Some(priority.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_env() -> Self {
        Self {
            priority: std::env::var(PRIORITY_ENV)
                .ok()
                .map(|value| parse_list(&value)),
        }
    }

    /// Effective selection order.
    pub fn priority(&self) -> Result<Vec<BackendKind>> {
        let entries = match &self.priority {
            Some(entries) if entries.iter().any(|entry| !entry.trim().is_empty()) => entries,
            _ => return Ok(BackendKind::PRIORITY.to_vec()),
        };
        let mut priority = Vec::with_capacity(entries.len());
        for entry in entries.iter().filter(|entry| !entry.trim().is_empty()) {
            let kind = entry.parse::<BackendKind>().map_err(|err| {
                warn!("unknown backend {entry:?} in processor priority");
                err
            })?;
            if priority.contains(&kind) {
                warn!("backend {kind} listed twice in processor priority");
            } else {
                priority.push(kind);
            }
        }
        Ok(priority)
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
