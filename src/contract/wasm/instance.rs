/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines [WasmInstance], a wasmer instance bound to one context.

use std::sync::Arc;

use wasmer_middlewares::metering::{get_remaining_points, set_remaining_points, MeteringPoints};

use super::env::Env;
use super::host_functions::{self, FuncError};
use super::store::instantiate_store;
use crate::context::ContextId;
use crate::contract::InstanceHandle;
use crate::error::BridgeError;
use crate::syscall::SyscallService;

/// prefix of the exported function implementing a contract method.
pub const METHOD_EXPORT_PREFIX: &str = "_";

/// name of the global exported by the metering middleware.
const REMAINING_POINTS_GLOBAL: &str = "wasmer_metering_remaining_points";

pub struct WasmInstance {
    env: Env,
    instance: Option<wasmer::Instance>,
    handle: Arc<InstanceHandle>,
}

impl WasmInstance {
    /// instantiates a compiled artifact for the context `ctx_id`, with `cpu_limit` points and
    /// `memory_limit` bytes of linear memory.
    pub(crate) fn new(
        artifact: &[u8],
        ctx_id: ContextId,
        syscall: Arc<SyscallService>,
        cpu_limit: u64,
        memory_limit: Option<usize>,
    ) -> Result<Self, BridgeError> {
        let store = instantiate_store(cpu_limit, memory_limit);
        // Safety: artifacts are produced by `Module::serialize` in the code cache.
        let module = unsafe { wasmer::Module::deserialize(&store, artifact) }
            .map_err(|e| BridgeError::CodeLoad(e.to_string()))?;

        let handle = Arc::new(InstanceHandle::default());
        let env = Env::new(ctx_id, syscall, handle.clone(), cpu_limit);
        let import_object = host_functions::imports(&store, &env);
        let instance = wasmer::Instance::new(&module, &import_object)
            .map_err(|e| BridgeError::CodeLoad(e.to_string()))?;

        set_remaining_points(&instance, cpu_limit);
        let global = instance
            .exports
            .get_global(REMAINING_POINTS_GLOBAL)
            .map_err(|e| BridgeError::CodeLoad(e.to_string()))?
            .clone();
        env.meter.lock().bind(global);

        Ok(Self {
            env,
            instance: Some(instance),
            handle,
        })
    }

    pub fn handle(&self) -> &Arc<InstanceHandle> {
        &self.handle
    }

    /// runs the exported function of the method stored in the context.
    pub fn exec(&mut self) -> Result<(), BridgeError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| BridgeError::Runtime("instance released".to_string()))?;
        let method = self.env.syscall.context(self.env.ctx_id)?.lock().method.clone();
        let export = format!("{METHOD_EXPORT_PREFIX}{method}");
        let func = instance
            .exports
            .get_native_function::<(), ()>(&export)
            .map_err(|_| BridgeError::Runtime(format!("method {method} not found")))?;

        let result = func.call();
        self.env.sync_usage();

        let exhausted = matches!(get_remaining_points(instance), MeteringPoints::Exhausted);
        match result {
            Ok(()) => self.handle.check_aborted(),
            Err(_) if exhausted => Err(BridgeError::OutOfCpuLimit),
            Err(e) => Err(match e.downcast::<FuncError>() {
                Ok(FuncError::Bridge(e)) => e,
                Ok(FuncError::GasExhaustionError) => BridgeError::OutOfCpuLimit,
                Ok(FuncError::Runtime(e)) => BridgeError::Runtime(e.to_string()),
                Err(e) => match self.handle.abort_reason() {
                    Some(reason) => BridgeError::Aborted(reason),
                    None => BridgeError::Runtime(e.message()),
                },
            }),
        }
    }

    /// drops the wasmer instance. The usage stays readable on the handle.
    pub fn release(&mut self) {
        if self.instance.take().is_some() {
            self.env.meter.lock().unbind();
        }
    }
}
