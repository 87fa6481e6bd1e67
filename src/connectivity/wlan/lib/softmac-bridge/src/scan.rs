// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scan coordination.
//!
//! The pending request of a hardware scan has exactly one owner at a time. The caller of
//! `start` owns it until the driver has accepted it, then it moves into the coordinator.
//! Whichever of completion, cancel timeout or start failure ends the scan claims the
//! `Running` state under the coordinator lock, and a sequence number keeps a late path from
//! touching a newer scan.

use {
    crate::{
        channel::Channel,
        device::{DeviceOps, DriverError, DriverResultExt, ScanRequest},
        error::ScanError,
    },
    log::{info, warn},
    parking_lot::{Condvar, Mutex},
    std::time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    HardwareOffload,
    SoftwareEmulated,
}

/// How a cancel or stop ended the scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanEnd {
    /// Nothing was running.
    Idle,
    /// The driver's completion arrived while waiting; it already notified the stack.
    Completed,
    /// The coordinator ended the scan itself; the caller notifies the stack.
    Forced(ScanMode),
}

enum ScanState {
    Idle,
    Running { mode: ScanMode, seq: u64, request: Option<Box<ScanRequest>> },
}

struct Inner {
    state: ScanState,
    next_seq: u64,
}

impl Inner {
    fn running_seq(&self) -> Option<u64> {
        match self.state {
            ScanState::Running { seq, .. } => Some(seq),
            ScanState::Idle => None,
        }
    }

    /// Ends scan `seq` if it is still the running one, releasing its request.
    fn claim(&mut self, seq: u64) -> Option<ScanMode> {
        match self.state {
            ScanState::Running { seq: running, mode, .. } if running == seq => {
                self.state = ScanState::Idle;
                Some(mode)
            }
            _ => None,
        }
    }
}

pub struct ScanCoordinator {
    inner: Mutex<Inner>,
    cond: Condvar,
    prefer_hw: bool,
    cancel_timeout: Duration,
}

impl ScanCoordinator {
    pub fn new(prefer_hw: bool, cancel_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { state: ScanState::Idle, next_seq: 1 }),
            cond: Condvar::new(),
            prefer_hw,
            cancel_timeout,
        }
    }

    pub fn mode(&self) -> Option<ScanMode> {
        match self.inner.lock().state {
            ScanState::Running { mode, .. } => Some(mode),
            ScanState::Idle => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.mode().is_some()
    }

    pub fn has_pending_request(&self) -> bool {
        matches!(self.inner.lock().state, ScanState::Running { request: Some(_), .. })
    }

    /// Starts a scan, offloaded to the driver when possible. A second start while one is
    /// running is rejected; the caller must cancel first.
    pub fn start<D: DeviceOps + ?Sized>(
        &self,
        ops: &D,
        req: ScanRequest,
    ) -> Result<ScanMode, ScanError> {
        let seq = {
            let mut inner = self.inner.lock();
            if inner.running_seq().is_some() {
                return Err(ScanError::AlreadyRunning);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let mode =
                if self.prefer_hw { ScanMode::HardwareOffload } else { ScanMode::SoftwareEmulated };
            inner.state = ScanState::Running { mode, seq, request: None };
            seq
        };

        if self.prefer_hw {
            match ops.start_scan(&req) {
                Ok(()) => {
                    let mut inner = self.inner.lock();
                    match &mut inner.state {
                        ScanState::Running { seq: running, request, .. } if *running == seq => {
                            *request = Some(Box::new(req));
                        }
                        // Completion beat us here and already ended the scan; `req` is
                        // released on return.
                        _ => info!("scan {} completed before start returned", seq),
                    }
                    info!("hardware scan {} started", seq);
                    return Ok(ScanMode::HardwareOffload);
                }
                Err(DriverError::NotSupported) => {
                    let mut inner = self.inner.lock();
                    if let ScanState::Running { seq: running, mode, .. } = &mut inner.state {
                        if *running == seq {
                            *mode = ScanMode::SoftwareEmulated;
                        }
                    }
                }
                Err(e) => {
                    if self.inner.lock().claim(seq).is_some() {
                        self.cond.notify_all();
                    } else {
                        warn!("scan {} failed to start but was already completed", seq);
                    }
                    return Err(ScanError::Driver(e));
                }
            }
        }

        if let Err(e) = ops.sw_scan_start().or_unsupported_ok() {
            if self.inner.lock().claim(seq).is_some() {
                self.cond.notify_all();
            }
            return Err(ScanError::Driver(e));
        }
        info!("software scan {} started on {} channels", seq, req.channels.len());
        Ok(ScanMode::SoftwareEmulated)
    }

    /// Driver notification that the running scan finished. Returns the mode of the scan that
    /// ended, or `None` for a completion with no scan running.
    pub fn complete(&self, aborted: bool) -> Option<ScanMode> {
        let mut inner = self.inner.lock();
        let seq = match inner.running_seq() {
            Some(seq) => seq,
            None => {
                warn!("scan completion (aborted: {}) with no scan running", aborted);
                return None;
            }
        };
        let mode = inner.claim(seq);
        self.cond.notify_all();
        info!("scan {} complete (aborted: {})", seq, aborted);
        mode
    }

    /// Aborts the running scan.
    pub fn cancel<D: DeviceOps + ?Sized>(&self, ops: &D) -> Result<ScanEnd, ScanError> {
        match self.finish(ops)? {
            ScanEnd::Idle => Err(ScanError::NotRunning),
            end => Ok(end),
        }
    }

    /// Like `cancel`, but stopping an idle coordinator is not an error.
    pub fn stop<D: DeviceOps + ?Sized>(&self, ops: &D) -> Result<ScanEnd, ScanError> {
        self.finish(ops)
    }

    fn finish<D: DeviceOps + ?Sized>(&self, ops: &D) -> Result<ScanEnd, ScanError> {
        let (seq, mode) = {
            let inner = self.inner.lock();
            match inner.state {
                ScanState::Idle => return Ok(ScanEnd::Idle),
                ScanState::Running { seq, mode, .. } => (seq, mode),
            }
        };

        match mode {
            ScanMode::SoftwareEmulated => {
                let claimed = self.inner.lock().claim(seq);
                self.cond.notify_all();
                if let Err(e) = ops.sw_scan_complete().or_unsupported_ok() {
                    warn!("sw_scan_complete failed: {}", e);
                }
                Ok(claimed.map_or(ScanEnd::Completed, ScanEnd::Forced))
            }
            ScanMode::HardwareOffload => {
                if let Err(e) = ops.cancel_scan().or_unsupported_ok() {
                    warn!("cancel_scan failed: {}", e);
                }
                let deadline = Instant::now() + self.cancel_timeout;
                let mut inner = self.inner.lock();
                while inner.running_seq() == Some(seq) {
                    if self.cond.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                match inner.claim(seq) {
                    Some(mode) => {
                        warn!(
                            "scan {} completion not observed within {:?}, ending it anyway",
                            seq, self.cancel_timeout
                        );
                        self.cond.notify_all();
                        Ok(ScanEnd::Forced(mode))
                    }
                    None => Ok(ScanEnd::Completed),
                }
            }
        }
    }

    /// Tunes the radio for the next channel of a software scan.
    pub fn set_channel<D: DeviceOps + ?Sized>(
        &self,
        ops: &D,
        channel: &Channel,
    ) -> Result<(), ScanError> {
        if self.mode() != Some(ScanMode::SoftwareEmulated) {
            return Err(ScanError::NotRunning);
        }
        ops.config_channel(channel).or_unsupported_ok().map_err(ScanError::Driver)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::Cbw,
            device::{DeviceCall, FakeDevice},
        },
        assert_matches::assert_matches,
        std::sync::Arc,
    };

    fn req() -> ScanRequest {
        ScanRequest {
            channels: vec![Channel::new(1, Cbw::Cbw20), Channel::new(36, Cbw::Cbw20)],
            ssids: vec![b"net".to_vec()],
            active: true,
        }
    }

    fn coordinator() -> ScanCoordinator {
        ScanCoordinator::new(true, Duration::from_millis(20))
    }

    #[test]
    fn second_start_is_rejected() {
        let dev = FakeDevice::new();
        let scan = coordinator();
        assert_eq!(scan.start(&dev, req()), Ok(ScanMode::HardwareOffload));
        assert_eq!(scan.start(&dev, req()), Err(ScanError::AlreadyRunning));
        assert_eq!(scan.mode(), Some(ScanMode::HardwareOffload));
        assert!(scan.has_pending_request());
        assert_eq!(dev.calls(), vec![DeviceCall::StartScan]);
    }

    #[test]
    fn completion_releases_request() {
        let dev = FakeDevice::new();
        let scan = coordinator();
        scan.start(&dev, req()).expect("scan starts");
        assert_eq!(scan.complete(false), Some(ScanMode::HardwareOffload));
        assert!(!scan.is_running());
        assert!(!scan.has_pending_request());
        assert_eq!(scan.complete(false), None);
    }

    #[test]
    fn falls_back_to_software() {
        let dev = FakeDevice::new();
        dev.fail_on("start_scan", DriverError::NotSupported);
        let scan = coordinator();
        assert_eq!(scan.start(&dev, req()), Ok(ScanMode::SoftwareEmulated));
        assert!(!scan.has_pending_request());
        assert_eq!(dev.calls(), vec![DeviceCall::StartScan, DeviceCall::SwScanStart]);
        scan.set_channel(&dev, &Channel::new(36, Cbw::Cbw20)).expect("tune");
        assert_eq!(scan.stop(&dev), Ok(ScanEnd::Forced(ScanMode::SoftwareEmulated)));
        assert_eq!(dev.calls().last(), Some(&DeviceCall::SwScanComplete));
        assert_eq!(
            scan.set_channel(&dev, &Channel::new(1, Cbw::Cbw20)),
            Err(ScanError::NotRunning)
        );
    }

    #[test]
    fn start_failure_returns_to_idle() {
        let dev = FakeDevice::new();
        dev.fail_on("start_scan", DriverError::Io);
        let scan = coordinator();
        assert_eq!(scan.start(&dev, req()), Err(ScanError::Driver(DriverError::Io)));
        assert!(!scan.is_running());
        dev.clear_failures();
        assert_eq!(scan.start(&dev, req()), Ok(ScanMode::HardwareOffload));
    }

    #[test]
    fn completion_during_failed_start_is_claimed_once() {
        let dev = FakeDevice::new();
        let scan = Arc::new(coordinator());
        let completer = scan.clone();
        let completions = Arc::new(Mutex::new(Vec::new()));
        let seen = completions.clone();
        dev.on("start_scan", move || seen.lock().push(completer.complete(true)));
        dev.fail_on("start_scan", DriverError::Io);
        assert_eq!(scan.start(&dev, req()), Err(ScanError::Driver(DriverError::Io)));
        assert_eq!(*completions.lock(), vec![Some(ScanMode::HardwareOffload)]);
        assert!(!scan.is_running());
        dev.clear_failures();
        assert_eq!(scan.start(&dev, req()), Ok(ScanMode::HardwareOffload));
        assert!(scan.has_pending_request());
    }

    #[test]
    fn completion_before_start_returns() {
        let dev = FakeDevice::new();
        let scan = Arc::new(coordinator());
        let completer = scan.clone();
        dev.on("start_scan", move || {
            completer.complete(false);
        });
        assert_eq!(scan.start(&dev, req()), Ok(ScanMode::HardwareOffload));
        assert!(!scan.is_running());
        assert!(!scan.has_pending_request());
    }

    #[test]
    fn cancel_observes_completion() {
        let dev = FakeDevice::new();
        let scan = Arc::new(ScanCoordinator::new(true, Duration::from_secs(5)));
        scan.start(&dev, req()).expect("scan starts");
        let completer = scan.clone();
        dev.on("cancel_scan", move || {
            let completer = completer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                completer.complete(true);
            });
        });
        assert_eq!(scan.cancel(&dev), Ok(ScanEnd::Completed));
        assert!(!scan.is_running());
    }

    #[test]
    fn cancel_times_out_and_proceeds() {
        let dev = FakeDevice::new();
        let scan = coordinator();
        scan.start(&dev, req()).expect("scan starts");
        assert_eq!(scan.cancel(&dev), Ok(ScanEnd::Forced(ScanMode::HardwareOffload)));
        assert!(!scan.is_running());
        assert!(!scan.has_pending_request());
        // The late completion is tolerated.
        assert_eq!(scan.complete(true), None);
    }

    #[test]
    fn cancel_when_idle() {
        let dev = FakeDevice::new();
        let scan = coordinator();
        assert_matches!(scan.cancel(&dev), Err(ScanError::NotRunning));
        assert_eq!(scan.stop(&dev), Ok(ScanEnd::Idle));
        assert!(dev.calls().is_empty());
    }
}
