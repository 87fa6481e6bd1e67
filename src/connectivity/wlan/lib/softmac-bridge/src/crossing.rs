// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Stack Lock / Driver Lock pair and the protocol for crossing from one to the other.
//!
//! # Lock ordering
//!
//! The two locks are never held together. A handler that runs under the Stack Lock and needs
//! the driver goes through [`LockPair::cross`], which:
//!
//! 1. takes the caller's strong node reference,
//! 2. releases the Stack Lock,
//! 3. takes the Driver Lock and runs the driver-side closure,
//! 4. releases the Driver Lock,
//! 5. re-takes the Stack Lock,
//! 6. compares the association snapshot taken before step 2 with the current one,
//! 7. releases the node reference.
//!
//! The driver closure cannot reach the stack's data: the guard is mutably borrowed for the
//! whole unlocked window. Debug builds also assert, per thread, that neither lock is taken
//! while the other is held.

use {
    crate::node::NodeRef,
    parking_lot::{Mutex, MutexGuard},
    std::{
        cell::Cell,
        ops::{Deref, DerefMut},
        ptr,
    },
};

thread_local! {
    static STACK_HELD: Cell<u32> = Cell::new(0);
    static DRIVER_HELD: Cell<u32> = Cell::new(0);
}

fn held(which: &'static std::thread::LocalKey<Cell<u32>>) -> bool {
    which.with(|c| c.get() > 0)
}

fn acquire(which: &'static std::thread::LocalKey<Cell<u32>>) {
    which.with(|c| c.set(c.get() + 1));
}

fn release(which: &'static std::thread::LocalKey<Cell<u32>>) {
    which.with(|c| c.set(c.get().saturating_sub(1)));
}

/// Stack-side state that can detect a change of association across an unlocked window.
pub trait Association {
    type Snapshot: PartialEq;

    fn association(&self) -> Self::Snapshot;
}

pub struct LockPair<S, D> {
    stack: Mutex<S>,
    driver: Mutex<D>,
}

pub struct StackGuard<'a, S> {
    guard: MutexGuard<'a, S>,
}

pub struct DriverGuard<'a, D> {
    guard: MutexGuard<'a, D>,
}

/// The result of a driver-side closure, plus whether the association was unchanged when the
/// Stack Lock was re-taken.
#[must_use]
#[derive(Debug)]
pub struct Crossed<T> {
    pub value: T,
    pub synced: bool,
}

impl<S: Association, D> LockPair<S, D> {
    pub fn new(stack: S, driver: D) -> Self {
        Self { stack: Mutex::new(stack), driver: Mutex::new(driver) }
    }

    pub fn lock_stack(&self) -> StackGuard<'_, S> {
        debug_assert!(!held(&DRIVER_HELD), "Stack Lock taken while holding the Driver Lock");
        let guard = self.stack.lock();
        acquire(&STACK_HELD);
        StackGuard { guard }
    }

    pub fn lock_driver(&self) -> DriverGuard<'_, D> {
        debug_assert!(!held(&STACK_HELD), "Driver Lock taken while holding the Stack Lock");
        let guard = self.driver.lock();
        acquire(&DRIVER_HELD);
        DriverGuard { guard }
    }

    /// Runs `f` under the Driver Lock with the Stack Lock released. `node` is kept alive for
    /// the whole window and dropped once the Stack Lock is held again.
    pub fn cross<T>(
        &self,
        stack: &mut StackGuard<'_, S>,
        node: NodeRef,
        f: impl FnOnce(&mut D, &NodeRef) -> T,
    ) -> Crossed<T> {
        assert!(
            ptr::eq(MutexGuard::mutex(&stack.guard), &self.stack),
            "stack guard belongs to a different lock pair"
        );
        let before = stack.guard.association();
        let value = MutexGuard::unlocked(&mut stack.guard, || {
            release(&STACK_HELD);
            let value = {
                let mut driver = self.lock_driver();
                f(&mut driver, &node)
            };
            acquire(&STACK_HELD);
            value
        });
        let synced = stack.guard.association() == before;
        drop(node);
        Crossed { value, synced }
    }
}

impl<S> Deref for StackGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for StackGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S> Drop for StackGuard<'_, S> {
    fn drop(&mut self) {
        release(&STACK_HELD);
    }
}

impl<D> Deref for DriverGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.guard
    }
}

impl<D> DerefMut for DriverGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.guard
    }
}

impl<D> Drop for DriverGuard<'_, D> {
    fn drop(&mut self) {
        release(&DRIVER_HELD);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::{Cbw, Channel},
            node::NodeTable,
        },
        std::sync::Arc,
    };

    #[derive(Default)]
    struct Stack {
        generation: u64,
    }

    impl Association for Stack {
        type Snapshot = u64;

        fn association(&self) -> u64 {
            self.generation
        }
    }

    fn node() -> NodeRef {
        NodeTable::new().alloc([1; 6], Channel::new(1, Cbw::Cbw20))
    }

    #[test]
    fn cross_runs_under_driver_lock() {
        let pair = LockPair::new(Stack::default(), 0u32);
        let mut stack = pair.lock_stack();
        let crossed = pair.cross(&mut stack, node(), |drv, node| {
            *drv += 1;
            node.addr()[0]
        });
        assert_eq!(crossed.value, 1);
        assert!(crossed.synced);
        drop(stack);
        assert_eq!(*pair.lock_driver(), 1);
    }

    #[test]
    fn node_reference_held_across_window() {
        let pair = LockPair::new(Stack::default(), ());
        let node = node();
        let observer = node.clone();
        let mut stack = pair.lock_stack();
        let crossed = pair.cross(&mut stack, node, |_, n| n.ref_count());
        assert_eq!(crossed.value, 2);
        assert_eq!(observer.ref_count(), 1);
    }

    #[test]
    fn change_while_unlocked_is_detected() {
        let pair = Arc::new(LockPair::new(Stack::default(), ()));
        let mut stack = pair.lock_stack();
        let other = pair.clone();
        let crossed = pair.cross(&mut stack, node(), move |_, _| {
            std::thread::spawn(move || other.lock_stack().generation += 1)
                .join()
                .expect("updater thread");
        });
        assert!(!crossed.synced);
        assert_eq!(stack.generation, 1);
    }

    #[test]
    #[should_panic(expected = "Stack Lock taken while holding the Driver Lock")]
    fn stack_under_driver_is_fatal() {
        let pair = LockPair::new(Stack::default(), ());
        let _driver = pair.lock_driver();
        let _stack = pair.lock_stack();
    }

    #[test]
    #[should_panic(expected = "Driver Lock taken while holding the Stack Lock")]
    fn nested_driver_under_stack_is_fatal() {
        let pair = LockPair::new(Stack::default(), ());
        let _stack = pair.lock_stack();
        let _driver = pair.lock_driver();
    }

    #[test]
    #[should_panic(expected = "different lock pair")]
    fn foreign_guard_is_fatal() {
        let a = LockPair::new(Stack::default(), ());
        let b = LockPair::new(Stack::default(), ());
        let mut stack = a.lock_stack();
        let _ = b.cross(&mut stack, node(), |_, _| ());
    }
}
