// =============================================================================
// Shared exposure store — cross-account notional/equity ledger on disk
// =============================================================================
//
// Multiple engine instances (one per account/venue pair) can share a single
// risk budget by reading and writing the same JSON file. The update pattern
// is the same atomic read-mutate-replace the runtime config uses for its own
// save, except the read happens first so concurrent writers don't clobber
// each other's entries — only the caller's own `account_tag` entry is
// replaced on each write.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SharedExposureEntry {
    pub equity: f64,
    pub notional: f64,
    pub updated_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedExposureTable {
    #[serde(flatten)]
    pub entries: HashMap<String, SharedExposureEntry>,
}

impl SharedExposureTable {
    fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("failed to serialise shared exposure table")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp exposure table to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp exposure table to {}", path.display()))?;
        Ok(())
    }

    /// Account-level equity is the maximum reported equity across entries
    /// sharing `account_tag` (accounts may report the same underlying
    /// balance from several processes); total notional is the sum across
    /// every tracked tag, since notional exposure is additive. Entries
    /// older than `max_age_sec` are excluded from both folds — a process
    /// that died without updating its entry shouldn't permanently inflate
    /// either figure.
    pub fn aggregate(&self, account_tag: &str, now_ms: i64, max_age_sec: f64) -> (f64, f64) {
        let cutoff_ms = now_ms - (max_age_sec * 1000.0) as i64;
        let fresh = || self.entries.values().filter(|v| v.updated_ms >= cutoff_ms);

        let account_equity = self
            .entries
            .iter()
            .filter(|(k, v)| k.starts_with(account_tag) && v.updated_ms >= cutoff_ms)
            .map(|(_, v)| v.equity)
            .fold(0.0_f64, f64::max);
        let total_notional = fresh().map(|v| v.notional).sum();
        (account_equity, total_notional)
    }
}

/// Read-mutate-replace a single tag's entry and persist the whole table.
pub fn update_exposure(path: impl AsRef<Path>, tag: &str, equity: f64, notional: f64, now_ms: i64) -> Result<SharedExposureTable> {
    let path = path.as_ref();
    let mut table = SharedExposureTable::load(path);
    table.entries.insert(tag.to_string(), SharedExposureEntry { equity, notional, updated_ms: now_ms });
    table.save(path)?;
    Ok(table)
}

pub fn read_exposure(path: impl AsRef<Path>) -> SharedExposureTable {
    SharedExposureTable::load(path.as_ref())
}
