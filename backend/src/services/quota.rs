// backend/src/services/quota.rs
//
// Daily request quota per visitor fingerprint. The durable counter is an
// external collaborator; this module carries its contract plus an in-memory
// day-bucketed implementation for single-process deployments and tests.

use crate::errors::AppError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub used: u32,
    pub remaining: u32,
    pub daily_limit: u32,
}

#[async_trait]
pub trait QuotaTracker: Send + Sync {
    /// Pre-turn check. Does not consume quota.
    async fn check(&self, fingerprint: &str) -> Result<QuotaStatus, AppError>;

    /// Post-turn debit; returns the updated snapshot.
    async fn debit(&self, fingerprint: &str) -> Result<QuotaStatus, AppError>;
}

pub struct InMemoryQuotaTracker {
    daily_limit: u32,
    counts: Mutex<HashMap<String, (NaiveDate, u32)>>,
}

impl InMemoryQuotaTracker {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn status(&self, used: u32) -> QuotaStatus {
        QuotaStatus {
            allowed: used < self.daily_limit,
            used,
            remaining: self.daily_limit.saturating_sub(used),
            daily_limit: self.daily_limit,
        }
    }

    fn used_today(map: &mut HashMap<String, (NaiveDate, u32)>, fingerprint: &str) -> u32 {
        let today = Utc::now().date_naive();
        match map.get(fingerprint) {
            Some((date, used)) if *date == today => *used,
            _ => 0,
        }
    }
}

#[async_trait]
impl QuotaTracker for InMemoryQuotaTracker {
    async fn check(&self, fingerprint: &str) -> Result<QuotaStatus, AppError> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| AppError::InternalServerError(anyhow::anyhow!("quota lock poisoned")))?;
        let used = Self::used_today(&mut counts, fingerprint);
        Ok(self.status(used))
    }

    async fn debit(&self, fingerprint: &str) -> Result<QuotaStatus, AppError> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| AppError::InternalServerError(anyhow::anyhow!("quota lock poisoned")))?;
        let used = Self::used_today(&mut counts, fingerprint) + 1;
        counts.insert(fingerprint.to_string(), (Utc::now().date_naive(), used));
        let mut status = self.status(used);
        // post-debit snapshot reports whether further turns are allowed
        status.allowed = used <= self.daily_limit;
        Ok(status)
    }
}
