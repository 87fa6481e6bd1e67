// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::worker::WorkerMode,
    anyhow::{ensure, Context, Result},
    log::LevelFilter,
    serde::{Deserialize, Serialize},
    std::{fs::File, io::BufReader, path::Path, time::Duration},
};

pub const DEFAULT_TX_QUEUE_LIMIT: usize = 512;
pub const DEFAULT_SCAN_CANCEL_TIMEOUT_MS: u64 = 1000;
pub const MAX_RX_CHAINS: u8 = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub worker_mode: WorkerMode,
    pub tx_queue_limit: usize,
    pub scan_cancel_timeout_ms: u64,
    /// Prefer hardware-offloaded scans. Drivers without one fall back to software scans.
    pub hw_scan: bool,
    pub rx_chains: u8,
    pub prepare_tx_duration_tu: u16,
    pub request_tx_status: bool,
    pub log_level: LevelFilter,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_mode: WorkerMode::Threaded,
            tx_queue_limit: DEFAULT_TX_QUEUE_LIMIT,
            scan_cancel_timeout_ms: DEFAULT_SCAN_CANCEL_TIMEOUT_MS,
            hw_scan: true,
            rx_chains: 1,
            prepare_tx_duration_tu: 0,
            request_tx_status: false,
            log_level: LevelFilter::Info,
        }
    }
}

impl BridgeConfig {
    /// Configuration used by unit tests: workers are driven by hand.
    pub fn manual() -> Self {
        Self { worker_mode: WorkerMode::Manual, ..Self::default() }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing bridge config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate().with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.tx_queue_limit > 0, "tx_queue_limit must be non-zero");
        ensure!(self.scan_cancel_timeout_ms > 0, "scan_cancel_timeout_ms must be non-zero");
        ensure!(
            self.rx_chains >= 1 && self.rx_chains <= MAX_RX_CHAINS,
            "rx_chains must be in 1..={}, got {}",
            MAX_RX_CHAINS,
            self.rx_chains
        );
        Ok(())
    }

    pub fn scan_cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_cancel_timeout_ms)
    }
}
