/// Backing store adapter.
///
/// Uniform get/set/remove over a quota-limited primary backend with an
/// unlimited fallback:
/// - reads retry the primary with linear backoff, then try the fallback,
///   then give up with the caller's default (never an error)
/// - writes warn on size and quota, redirect to the fallback when the
///   primary rejects them for quota, and return any other primary failure
/// - every write is counted against the remote write-rate ceilings (warn only)
use std::sync::Arc;

use serde::Serialize;

use super::rate::{RateStatus, WriteRateTracker};
use super::{item_size, KeyValueBackend, StorageError};
use crate::config::StorageConfig;

/// Which backend accepted a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteTarget {
    Primary,
    Fallback,
}

/// Result of the pre-write size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub size: usize,
    /// Primary usage after the write; `None` when the primary could not report it.
    pub projected_usage: Option<usize>,
    pub over_item_cap: bool,
    pub over_total_quota: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub bytes_in_use: usize,
    pub quota_bytes: usize,
}

impl StorageUsage {
    /// Share of the quota in use, 0.0 to 1.0 (may exceed 1.0 if over quota).
    pub fn fraction(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 0.0;
        }
        self.bytes_in_use as f64 / self.quota_bytes as f64
    }
}

pub struct StorageAdapter {
    primary: Arc<dyn KeyValueBackend>,
    fallback: Arc<dyn KeyValueBackend>,
    config: StorageConfig,
    rate: WriteRateTracker,
}

impl StorageAdapter {
    pub fn new(
        primary: Arc<dyn KeyValueBackend>,
        fallback: Arc<dyn KeyValueBackend>,
        config: StorageConfig,
    ) -> Self {
        let rate = WriteRateTracker::new(config.max_writes_per_minute, config.max_writes_per_hour);
        Self {
            primary,
            fallback,
            config,
            rate,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Read `key`. Tries the primary up to `read_attempts` times, sleeping
    /// `retry_base_ms * attempt` between attempts, then the fallback.
    pub async fn get(&self, key: &str) -> Option<String> {
        let attempts = self.config.read_attempts.max(1);
        for attempt in 1..=attempts {
            match self.primary.get(key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => break,
                Err(e) => {
                    log::warn!(
                        target: "tabboard.storage.adapter",
                        "Read of {} from {} failed (attempt {}/{}): {}",
                        key,
                        self.primary.name(),
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay(attempt)).await;
                    }
                }
            }
        }

        match self.fallback.get(key).await {
            Ok(value) => value,
            Err(e) => {
                log::error!(
                    target: "tabboard.storage.adapter",
                    "Read of {} from {} failed: {}",
                    key,
                    self.fallback.name(),
                    e
                );
                None
            }
        }
    }

    /// Read `key`, or `default` when neither backend has it.
    pub async fn get_or(&self, key: &str, default: impl Into<String>) -> String {
        match self.get(key).await {
            Some(value) => value,
            None => default.into(),
        }
    }

    /// Measure a prospective write against the per-item cap and total quota.
    pub async fn check_quota(&self, key: &str, value: &str) -> QuotaCheck {
        let size = item_size(key, value);
        let projected_usage = match (
            self.primary.bytes_in_use().await,
            self.primary.item_bytes(key).await,
        ) {
            (Ok(in_use), Ok(existing)) => Some(in_use.saturating_sub(existing) + size),
            (Err(e), _) | (_, Err(e)) => {
                log::debug!(
                    target: "tabboard.storage.quota",
                    "Usage of {} unavailable: {}",
                    self.primary.name(),
                    e
                );
                None
            }
        };
        QuotaCheck {
            size,
            projected_usage,
            over_item_cap: size > self.config.quota_bytes_per_item,
            over_total_quota: projected_usage.is_some_and(|u| u > self.config.quota_bytes),
        }
    }

    /// Write `value` under `key`.
    ///
    /// Size problems are logged, not enforced; the primary decides. A quota
    /// rejection from the primary sends the write to the fallback and still
    /// succeeds. Any other primary error is returned.
    pub async fn set(&self, key: &str, value: &str) -> Result<WriteTarget, StorageError> {
        let check = self.check_quota(key, value).await;
        if check.over_item_cap {
            log::warn!(
                target: "tabboard.storage.quota",
                "Item {} is {} bytes, over the per-item cap of {}",
                key,
                check.size,
                self.config.quota_bytes_per_item
            );
        }
        if check.over_total_quota {
            log::error!(
                target: "tabboard.storage.quota",
                "Writing {} would use {} bytes, over the quota of {}",
                key,
                check.projected_usage.unwrap_or(check.size),
                self.config.quota_bytes
            );
        }

        match self.rate.record() {
            RateStatus::Within => {}
            RateStatus::MinuteCeilingExceeded { count, max } => log::warn!(
                target: "tabboard.storage.rate",
                "{} writes in the last minute (ceiling {})",
                count,
                max
            ),
            RateStatus::HourCeilingExceeded { count, max } => log::warn!(
                target: "tabboard.storage.rate",
                "{} writes in the last hour (ceiling {})",
                count,
                max
            ),
        }

        match self.primary.set(key, value).await {
            Ok(()) => {
                // Drop a copy an earlier quota fallback left behind.
                if let Err(e) = self.fallback.remove(key).await {
                    log::debug!(
                        target: "tabboard.storage.adapter",
                        "Could not clear stale {} copy of {}: {}",
                        self.fallback.name(),
                        key,
                        e
                    );
                }
                Ok(WriteTarget::Primary)
            }
            Err(e) if e.is_quota_exceeded() => {
                log::warn!(
                    target: "tabboard.storage.quota",
                    "{}; writing {} to {} instead",
                    e,
                    key,
                    self.fallback.name()
                );
                self.fallback.set(key, value).await?;
                // The primary copy is now older than the fallback one, and a
                // later read would prefer it.
                if let Err(e) = self.primary.remove(key).await {
                    log::warn!(
                        target: "tabboard.storage.adapter",
                        "Could not clear stale {} copy of {}: {}",
                        self.primary.name(),
                        key,
                        e
                    );
                }
                Ok(WriteTarget::Fallback)
            }
            Err(e) => {
                log::error!(
                    target: "tabboard.storage.adapter",
                    "Write of {} to {} failed: {}",
                    key,
                    self.primary.name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Best-effort delete from both backends.
    pub async fn remove(&self, key: &str) {
        for backend in [&self.primary, &self.fallback] {
            if let Err(e) = backend.remove(key).await {
                log::warn!(
                    target: "tabboard.storage.adapter",
                    "Remove of {} from {} failed: {}",
                    key,
                    backend.name(),
                    e
                );
            }
        }
    }

    /// Primary usage against the configured quota.
    pub async fn usage(&self) -> Result<StorageUsage, StorageError> {
        Ok(StorageUsage {
            bytes_in_use: self.primary.bytes_in_use().await?,
            quota_bytes: self.config.quota_bytes,
        })
    }
}
