//! Interrupt state and the safe-point signal protocol.
//!
//! The host raises interrupts through a cloneable [`InterruptHandle`]; the
//! engine polls a single pending flag at instruction boundaries (a superset
//! of the required send/backward-jump checkpoints) and, when set, signals
//! the registered semaphores: the timer semaphore for ticks, the
//! finalization semaphore, then externally signalled semaphores in arrival
//! order. A signal that causes a process switch stops the drain; the
//! remaining work re-arms the flag and continues at the next safe point.

use core_types::{ObjectId, VmError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::scheduler::signal_semaphore;
use crate::vm::Vm;

/// VM-side interrupt state.
#[derive(Debug, Default)]
pub struct InterruptState {
    pending: Arc<AtomicBool>,
    tick: Arc<AtomicBool>,
    external_queue: Arc<Mutex<VecDeque<usize>>>,
    timer_semaphore: Option<ObjectId>,
    finalization_semaphore: Option<ObjectId>,
    pending_finalizations: bool,
    external_semaphores: Vec<Option<ObjectId>>,
}

impl InterruptState {
    /// Fresh, quiescent interrupt state.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle the host may clone into other threads.
    pub fn handle(&self) -> InterruptHandle {
        InterruptHandle {
            pending: self.pending.clone(),
            tick: self.tick.clone(),
            external_queue: self.external_queue.clone(),
        }
    }

    /// Register the semaphore signalled on timer ticks.
    pub fn set_timer_semaphore(&mut self, semaphore: Option<ObjectId>) {
        self.timer_semaphore = semaphore;
    }

    /// Register the semaphore signalled for pending finalizations.
    pub fn set_finalization_semaphore(&mut self, semaphore: Option<ObjectId>) {
        self.finalization_semaphore = semaphore;
    }

    /// Note that finalizations are pending; signalled at the next safe point.
    pub fn note_pending_finalizations(&mut self) {
        self.pending_finalizations = true;
        self.pending.store(true, Ordering::Release);
    }

    /// Register an external semaphore; the returned index is what
    /// [`InterruptHandle::signal_external`] takes.
    pub fn register_external_semaphore(&mut self, semaphore: ObjectId) -> usize {
        self.external_semaphores.push(Some(semaphore));
        self.external_semaphores.len() - 1
    }

    /// Drop an external semaphore registration.
    pub fn unregister_external_semaphore(&mut self, index: usize) {
        if let Some(slot) = self.external_semaphores.get_mut(index) {
            *slot = None;
        }
    }

    /// Semaphores the interrupt machinery keeps alive, for the tracer.
    pub fn each_reference(&self, f: &mut dyn FnMut(ObjectId)) {
        if let Some(id) = self.timer_semaphore {
            f(id);
        }
        if let Some(id) = self.finalization_semaphore {
            f(id);
        }
        for id in self.external_semaphores.iter().flatten() {
            f(*id);
        }
    }

    fn re_arm_if_work_remains(&self) {
        if self.pending_finalizations || !self.external_queue.lock().is_empty() {
            self.pending.store(true, Ordering::Release);
        }
    }
}

/// Host-facing interrupt requester. Cloneable and thread-safe; effects are
/// deferred to the engine's next safe point.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    pending: Arc<AtomicBool>,
    tick: Arc<AtomicBool>,
    external_queue: Arc<Mutex<VecDeque<usize>>>,
}

impl InterruptHandle {
    /// Request a timer tick / generic interrupt.
    pub fn signal(&self) {
        self.tick.store(true, Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    /// Queue a signal for the external semaphore registered at `index`.
    pub fn signal_external(&self, index: usize) {
        self.external_queue.lock().push_back(index);
        self.pending.store(true, Ordering::Release);
    }
}

/// Poll and, when pending, run the semaphore-signal protocol. Returns
/// whether a process switch happened; the caller must not have started
/// executing an instruction.
pub fn check_interrupts(vm: &mut Vm) -> Result<bool, VmError> {
    if !vm.interrupt.pending.swap(false, Ordering::Acquire) {
        return Ok(false);
    }

    if vm.interrupt.tick.swap(false, Ordering::Acquire) {
        if let Some(semaphore) = vm.interrupt.timer_semaphore {
            log::trace!("signalling timer semaphore {:?}", semaphore);
            if signal_semaphore(vm, semaphore)? {
                vm.interrupt.re_arm_if_work_remains();
                return Ok(true);
            }
        }
    }

    if vm.interrupt.pending_finalizations {
        vm.interrupt.pending_finalizations = false;
        if let Some(semaphore) = vm.interrupt.finalization_semaphore {
            log::trace!("signalling finalization semaphore {:?}", semaphore);
            if signal_semaphore(vm, semaphore)? {
                vm.interrupt.re_arm_if_work_remains();
                return Ok(true);
            }
        }
    }

    loop {
        let index = vm.interrupt.external_queue.lock().pop_front();
        let Some(index) = index else { break };
        let semaphore = vm
            .interrupt
            .external_semaphores
            .get(index)
            .copied()
            .flatten();
        if let Some(semaphore) = semaphore {
            log::trace!("signalling external semaphore {:?}", semaphore);
            if signal_semaphore(vm, semaphore)? {
                vm.interrupt.re_arm_if_work_remains();
                return Ok(true);
            }
        }
    }

    Ok(false)
}
