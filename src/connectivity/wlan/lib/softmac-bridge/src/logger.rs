// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A minimal `log` backend for embedders that have not installed one.

use {
    crate::config::BridgeConfig,
    log::{LevelFilter, Metadata, Record},
    std::io::Write,
};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let stderr = std::io::stderr();
            let mut out = stderr.lock();
            // A failed write to stderr has nowhere else to go.
            let _ = writeln!(
                out,
                "[wlan-bridge] {} {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the stderr logger. Returns false if a logger was already installed, in which
/// case only the max level is updated.
pub fn init(level: LevelFilter) -> bool {
    let installed = log::set_logger(&LOGGER).is_ok();
    log::set_max_level(level);
    installed
}

pub fn init_from_config(config: &BridgeConfig) -> bool {
    init(config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_noop() {
        // Either this call or an earlier test installed the logger; the next call cannot.
        let _ = init(LevelFilter::Debug);
        assert!(!init_from_config(&BridgeConfig::default()));
        assert_eq!(log::max_level(), LevelFilter::Info);
        log::info!("logger installed");
    }
}
