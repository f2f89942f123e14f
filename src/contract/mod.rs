/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the execution unit of one contract call ([Instance]) and the per-runtime factory that
//! builds it ([InstanceCreator]).
//!
//! Three runtimes are supported: [wasm] (wasmer, gas metered), [native] (contracts compiled into
//! the node) and [evm] (rust-ethereum interpreter). Whatever the runtime, an instance talks to the
//! chain only through the [SyscallService](crate::syscall::SyscallService), using the id of its
//! [Context](crate::context::Context).

pub mod evm;

pub mod native;

pub mod wasm;

use parking_lot::Mutex;

use crate::code_provider::ContractCodeProvider;
use crate::context::ContextRef;
use crate::error::BridgeError;
use crate::limits::Limits;

/// The four operations common to every runtime.
pub trait ContractInstance {
    /// runs the method stored in the context. On success the output of the context has been set.
    fn exec(&mut self) -> Result<(), BridgeError>;

    /// resources used by the instance so far.
    fn resource_used(&self) -> Limits;

    /// frees runtime resources. Idempotent, and safe after a failed exec.
    fn release(&mut self);

    /// terminates a running exec with an error.
    fn abort(&self, reason: &str);
}

/// Instance is a runnable contract call of one of the supported runtimes.
pub enum Instance {
    Wasm(self::wasm::WasmInstance),
    Native(self::native::NativeInstance),
    Evm(self::evm::EvmInstance),
}

impl Instance {
    /// handle shared with the context while the instance is alive.
    pub fn handle(&self) -> &std::sync::Arc<InstanceHandle> {
        match self {
            Instance::Wasm(i) => i.handle(),
            Instance::Native(i) => i.handle(),
            Instance::Evm(i) => i.handle(),
        }
    }
}

impl ContractInstance for Instance {
    fn exec(&mut self) -> Result<(), BridgeError> {
        match self {
            Instance::Wasm(i) => i.exec(),
            Instance::Native(i) => i.exec(),
            Instance::Evm(i) => i.exec(),
        }
    }

    fn resource_used(&self) -> Limits {
        self.handle().usage()
    }

    fn release(&mut self) {
        match self {
            Instance::Wasm(i) => i.release(),
            Instance::Native(i) => i.release(),
            Instance::Evm(i) => i.release(),
        }
    }

    fn abort(&self, reason: &str) {
        self.handle().abort(reason)
    }
}

/// InstanceCreator builds instances of one runtime.
pub trait InstanceCreator: Send + Sync {
    /// builds an instance bound to `ctx`. Fails if the code cannot be loaded by this runtime.
    fn create_instance(
        &self,
        ctx: &ContextRef,
        cp: Box<dyn ContractCodeProvider>,
    ) -> Result<Instance, BridgeError>;

    /// drops whatever the runtime keeps for the contract (e.g. compiled code).
    fn remove_cache(&self, contract_name: &str);
}

/// InstanceHandle is the part of an instance reachable from its context: the syscall service
/// reads the usage so far (to budget nested calls) and aborts the instance through it.
#[derive(Debug, Default)]
pub struct InstanceHandle {
    aborted: Mutex<Option<String>>,
    used: Mutex<Limits>,
}

impl InstanceHandle {
    pub fn abort(&self, reason: &str) {
        let mut aborted = self.aborted.lock();
        if aborted.is_none() {
            *aborted = Some(reason.to_string());
        }
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.aborted.lock().clone()
    }

    /// fails with [BridgeError::Aborted] if the instance has been aborted.
    pub fn check_aborted(&self) -> Result<(), BridgeError> {
        match self.abort_reason() {
            Some(reason) => Err(BridgeError::Aborted(reason)),
            None => Ok(()),
        }
    }

    pub fn usage(&self) -> Limits {
        *self.used.lock()
    }

    pub fn set_usage(&self, used: Limits) {
        *self.used.lock() = used;
    }

    pub fn add_cpu(&self, cpu: i64) -> Limits {
        let mut used = self.used.lock();
        used.cpu = used.cpu.saturating_add(cpu);
        *used
    }
}
