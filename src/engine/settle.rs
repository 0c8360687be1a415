//! UI-settle wait.
//!
//! After a gesture the engine polls the accessibility dump and declares the
//! UI settled once two consecutive samples are identical. The timebox always
//! wins; this replaces unconditional sleeps, it does not guarantee animations
//! have fully finished.

use std::time::{Duration, Instant};

use crate::device::DeviceSession;

#[derive(Debug, Clone)]
pub struct SettleConfig {
    pub timeout_ms: u64,
    pub poll_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1200,
            poll_ms: 150,
        }
    }
}

/// Returns true when the UI settled inside the budget, false on timeout.
/// Transient read errors skip the sample and never abort the wait.
pub async fn wait_for_ui_settle(device: &dyn DeviceSession, config: &SettleConfig) -> bool {
    let deadline = Instant::now() + Duration::from_millis(config.timeout_ms);
    let mut last_sample: Option<String> = None;

    loop {
        match device.get_page_source().await {
            Ok(source) => {
                let normalized = normalize_dump(&source);
                if last_sample.as_deref() == Some(normalized.as_str()) {
                    tracing::debug!("UI settled");
                    return true;
                }
                last_sample = Some(normalized);
            }
            Err(e) => {
                tracing::debug!(error = %e, "settle sample skipped");
            }
        }

        if Instant::now() >= deadline {
            tracing::debug!(timeout_ms = config.timeout_ms, "UI settle timed out");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(config.poll_ms)).await;
    }
}

/// Some platforms pad the dump with trailing whitespace that flaps between
/// reads; strip it before the byte comparison.
fn normalize_dump(source: &str) -> String {
    source
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
