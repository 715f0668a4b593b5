//! Whitelist, blacklist and time-bounded temporary blocks.
//!
//! Precedence is strict: whitelist, then blacklist, then an unexpired
//! temporary block, then clear.

use std::fmt;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::time::Instant;

use crate::utils::{AdmissionError, AdmissionResult};

/// Longest temporary block; larger durations are clamped to this
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Active temporary block for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub identity: String,
    pub reason: String,
    pub expires_at: Instant,
}

impl Block {
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Resolved standing of an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    Whitelisted,
    Blacklisted,
    TemporarilyBlocked { reason: String, until: Instant },
    Clear,
}

impl BlockStatus {
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            BlockStatus::Blacklisted | BlockStatus::TemporarilyBlocked { .. }
        )
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStatus::Whitelisted => write!(f, "whitelisted"),
            BlockStatus::Blacklisted => write!(f, "blacklisted"),
            BlockStatus::TemporarilyBlocked { reason, until } => {
                let left = until.saturating_duration_since(Instant::now());
                write!(f, "temporarily blocked ({}) for another {}s", reason, left.as_secs())
            }
            BlockStatus::Clear => write!(f, "clear"),
        }
    }
}

/// Counts exposed to the stats endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySizes {
    pub blocked: usize,
    pub whitelisted: usize,
    pub blacklisted: usize,
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    whitelist: DashSet<String>,
    blacklist: DashSet<String>,
    blocks: DashMap<String, Block>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the identity's standing, dropping its block if it has lapsed
    pub fn status(&self, identity: &str) -> BlockStatus {
        if self.whitelist.contains(identity) {
            return BlockStatus::Whitelisted;
        }
        if self.blacklist.contains(identity) {
            return BlockStatus::Blacklisted;
        }
        match self.active_block(identity) {
            Some(block) => BlockStatus::TemporarilyBlocked {
                reason: block.reason,
                until: block.expires_at,
            },
            None => BlockStatus::Clear,
        }
    }

    /// The identity's temporary block if it has not expired yet
    pub fn active_block(&self, identity: &str) -> Option<Block> {
        let now = Instant::now();
        if let Some(block) = self.blocks.get(identity) {
            if block.is_active(now) {
                return Some(block.clone());
            }
        }
        self.blocks.remove_if(identity, |_, block| !block.is_active(now));
        None
    }

    /// Block `identity` until `now + duration_seconds`, replacing any
    /// existing block rather than stacking on it. Durations beyond
    /// [`MAX_BLOCK_DURATION`] are clamped.
    pub fn add_temporary_block(
        &self,
        identity: &str,
        reason: &str,
        duration_seconds: u64,
    ) -> AdmissionResult<Block> {
        let duration = Duration::from_secs(duration_seconds).min(MAX_BLOCK_DURATION);
        let expires_at = Instant::now().checked_add(duration).ok_or_else(|| {
            AdmissionError::Internal(format!(
                "block of {}s for {} is not representable",
                duration.as_secs(),
                identity
            ))
        })?;
        let block = Block {
            identity: identity.to_string(),
            reason: reason.to_string(),
            expires_at,
        };
        self.blocks.insert(identity.to_string(), block.clone());
        Ok(block)
    }

    /// Clear a temporary block; returns true if one existed
    pub fn remove_temporary_block(&self, identity: &str) -> bool {
        self.blocks.remove(identity).is_some()
    }

    /// Returns true if the identity was not already whitelisted
    pub fn add_to_whitelist(&self, identity: &str) -> bool {
        self.whitelist.insert(identity.to_string())
    }

    pub fn remove_from_whitelist(&self, identity: &str) -> bool {
        self.whitelist.remove(identity).is_some()
    }

    /// Returns true if the identity was not already blacklisted
    pub fn add_to_blacklist(&self, identity: &str) -> bool {
        self.blacklist.insert(identity.to_string())
    }

    pub fn remove_from_blacklist(&self, identity: &str) -> bool {
        self.blacklist.remove(identity).is_some()
    }

    pub fn is_whitelisted(&self, identity: &str) -> bool {
        self.whitelist.contains(identity)
    }

    pub fn is_blacklisted(&self, identity: &str) -> bool {
        self.blacklist.contains(identity)
    }

    pub fn blacklisted(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.blacklist.iter().map(|id| id.key().clone()).collect();
        identities.sort();
        identities
    }

    /// Drop every lapsed temporary block; returns how many were removed
    pub fn expire_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.blocks.len();
        self.blocks.retain(|_, block| block.is_active(now));
        before.saturating_sub(self.blocks.len())
    }

    pub fn sizes(&self) -> RegistrySizes {
        let now = Instant::now();
        RegistrySizes {
            blocked: self.blocks.iter().filter(|block| block.is_active(now)).count(),
            whitelisted: self.whitelist.len(),
            blacklisted: self.blacklist.len(),
        }
    }
}
