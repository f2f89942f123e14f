/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the environment shared by the host functions of one wasm instance.
//!
//! The environment carries the id of the context the instance runs in, the syscall service used to
//! serve host calls, and the metering global of the instance so that host functions can charge cpu.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use wasmer::{Array, Global, LazyInit, Memory, NativeFunc, Value, WasmPtr};

use super::cost;
use super::host_functions::FuncError;
use super::memory::MemoryContext;
use crate::context::ContextId;
use crate::contract::InstanceHandle;
use crate::limits::Limits;
use crate::syscall::SyscallService;

/// Env is cloned into every host function. Wasmer fills the exports when the instance is created.
#[derive(wasmer::WasmerEnv, Clone)]
pub struct Env {
    pub ctx_id: ContextId,

    pub syscall: Arc<SyscallService>,

    pub handle: Arc<InstanceHandle>,

    pub meter: Arc<Mutex<CpuMeter>>,

    #[wasmer(export)]
    pub memory: LazyInit<Memory>,

    #[wasmer(export(name = "alloc"))]
    pub alloc: LazyInit<NativeFunc<u32, WasmPtr<u8, Array>>>,
}

impl Env {
    pub fn new(
        ctx_id: ContextId,
        syscall: Arc<SyscallService>,
        handle: Arc<InstanceHandle>,
        cpu_limit: u64,
    ) -> Self {
        Self {
            ctx_id,
            syscall,
            handle,
            meter: Arc::new(Mutex::new(CpuMeter::new(cpu_limit))),
            memory: LazyInit::default(),
            alloc: LazyInit::default(),
        }
    }

    /// charges `amount` cpu for work done by the host on behalf of the instance.
    pub fn consume_cpu(&self, amount: u64) -> Result<(), FuncError> {
        self.meter.lock().consume(amount, false)
    }

    /// charges cpu already accounted elsewhere (a finished sub call), so that the instance cannot
    /// spend it again.
    pub fn consume_external_cpu(&self, amount: u64) -> Result<(), FuncError> {
        self.meter.lock().consume(amount, true)
    }

    /// publishes the usage of the instance to its handle.
    pub fn sync_usage(&self) {
        let memory = self
            .memory_ref()
            .map(|memory| memory.size().bytes().0 as i64)
            .unwrap_or_default();
        let cpu = self.meter.lock().used() as i64;
        self.handle.set_usage(Limits {
            cpu,
            memory,
            ..Limits::default()
        });
    }

    /// read from guest memory, charging the read.
    pub fn read_bytes(&self, offset: u32, len: u32) -> Result<Vec<u8>, FuncError> {
        self.consume_cpu(cost::memory_read_cost(len as usize))?;
        Ok(MemoryContext::read_bytes_from_memory(self, offset, len)?)
    }

    /// write into guest memory, charging the write. Returns the length written.
    pub fn write_bytes(&self, value: &[u8], val_ptr_ptr: u32) -> Result<u32, FuncError> {
        self.consume_cpu(cost::memory_write_cost(value.len()))?;
        Ok(MemoryContext::write_bytes_to_memory(self, value, val_ptr_ptr)?)
    }

    pub fn read_string(&self, offset: u32, len: u32) -> Result<String, FuncError> {
        let bytes = self.read_bytes(offset, len)?;
        String::from_utf8(bytes).map_err(|e| FuncError::Runtime(e.into()))
    }
}

impl MemoryContext for Env {
    fn get_memory(&self) -> anyhow::Result<&Memory> {
        self.memory_ref()
            .ok_or_else(|| anyhow!("contract does not export memory"))
    }

    fn get_alloc(&self) -> anyhow::Result<&NativeFunc<u32, WasmPtr<u8, Array>>> {
        self.alloc_ref()
            .ok_or_else(|| anyhow!("contract does not export alloc"))
    }
}

/// CpuMeter tracks the metering global of an instance. The global is the remaining cpu points of
/// the instance; `external` is the part of the consumed points that was charged for sub calls.
pub struct CpuMeter {
    limit: u64,
    external: u64,
    remaining: Option<Global>,
}

impl CpuMeter {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            external: 0,
            remaining: None,
        }
    }

    /// binds the `wasmer_metering_remaining_points` global of a new instance.
    pub fn bind(&mut self, global: Global) {
        self.remaining = Some(global);
    }

    pub fn unbind(&mut self) {
        self.remaining = None;
    }

    fn remaining_points(&self) -> u64 {
        match self.remaining.as_ref().map(Global::get) {
            Some(Value::I64(points)) => points as u64,
            // unbound: nothing consumed beyond what was recorded
            _ => self.limit.saturating_sub(self.external),
        }
    }

    /// cpu consumed by the instance itself.
    pub fn used(&self) -> u64 {
        self.limit
            .saturating_sub(self.remaining_points())
            .saturating_sub(self.external)
    }

    fn consume(&mut self, amount: u64, external: bool) -> Result<(), FuncError> {
        if amount == 0 {
            return Ok(());
        }
        let remaining = self.remaining_points();
        let charged = amount.min(remaining);
        if let Some(global) = &self.remaining {
            global.set(Value::I64((remaining - charged) as i64))?;
        }
        if external {
            self.external = self.external.saturating_add(charged);
        }
        if charged < amount {
            return Err(FuncError::GasExhaustionError);
        }
        Ok(())
    }
}
