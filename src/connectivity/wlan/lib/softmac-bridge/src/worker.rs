// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Single-consumer deferred work.
//!
//! A `Worker` runs one task, at most once at a time, each time it is scheduled. Scheduling a
//! worker that is already pending is a no-op, so any number of `schedule` calls between two
//! runs cost exactly one run.

use {
    parking_lot::{Condvar, Mutex},
    serde::{Deserialize, Serialize},
    std::{
        sync::Arc,
        thread::{self, JoinHandle, ThreadId},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Each worker owns a thread that runs the task when scheduled.
    Threaded,
    /// Pending work runs only when `run_pending` is called.
    Manual,
}

#[derive(Default)]
struct WorkState {
    pending: bool,
    running: bool,
    runner: Option<ThreadId>,
    shutdown: bool,
    passes: u64,
}

struct Shared {
    name: String,
    state: Mutex<WorkState>,
    cond: Condvar,
    task: Box<dyn Fn() + Send + Sync>,
}

impl Shared {
    /// Claims and runs one pending pass. Returns false if nothing was pending or another
    /// pass is in progress.
    fn run_once(&self) -> bool {
        let mut state = self.state.lock();
        if !state.pending || state.running || state.shutdown {
            return false;
        }
        state.pending = false;
        state.running = true;
        state.runner = Some(thread::current().id());
        drop(state);

        let _pass = Pass(self);
        (self.task)();
        true
    }

    fn thread_main(&self) {
        loop {
            {
                let mut state = self.state.lock();
                while (!state.pending || state.running) && !state.shutdown {
                    self.cond.wait(&mut state);
                }
                if state.shutdown {
                    return;
                }
            }
            self.run_once();
        }
    }
}

/// Ends the running pass when dropped, so waiters are released even if the task panics.
struct Pass<'a>(&'a Shared);

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.running = false;
        state.runner = None;
        if !thread::panicking() {
            state.passes += 1;
        }
        self.0.cond.notify_all();
    }
}

pub struct Worker {
    shared: Arc<Shared>,
    mode: WorkerMode,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl Worker {
    /// Creates a worker. In threaded mode no thread runs until `start` is called.
    pub fn new(
        name: impl Into<String>,
        mode: WorkerMode,
        task: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(WorkState::default()),
                cond: Condvar::new(),
                task: Box::new(task),
            }),
            mode,
            thread: Mutex::new(None),
            thread_id: Mutex::new(None),
        }
    }

    pub fn start(&self) -> std::io::Result<()> {
        if self.mode == WorkerMode::Manual {
            return Ok(());
        }
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || shared.thread_main())?;
        *self.thread_id.lock() = Some(handle.thread().id());
        *slot = Some(handle);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Marks the worker pending. Returns false if it already was, or if it has been shut
    /// down.
    pub fn schedule(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.pending {
            return false;
        }
        state.pending = true;
        self.shared.cond.notify_all();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending
    }

    /// Runs one pending pass on the calling thread.
    pub fn run_pending(&self) -> bool {
        self.shared.run_once()
    }

    /// Drops any pending pass and waits for an in-progress one to finish. The worker can be
    /// scheduled again afterwards. Called from the task itself, it does not wait.
    pub fn cancel_sync(&self) {
        let mut state = self.shared.state.lock();
        state.pending = false;
        if state.runner == Some(thread::current().id()) {
            return;
        }
        while state.running {
            self.shared.cond.wait(&mut state);
        }
    }

    /// Cancels the worker for good and joins its thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.pending = false;
            self.shared.cond.notify_all();
            if state.runner != Some(thread::current().id()) {
                while state.running {
                    self.shared.cond.wait(&mut state);
                }
            }
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if *self.thread_id.lock() == Some(thread::current().id()) {
                // The last reference was dropped by the task itself; the thread exits on its
                // own once the task returns.
                return;
            }
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.shared.name);
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.shared.state.lock().passes
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
