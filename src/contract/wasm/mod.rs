/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Utilizes [Wasmer](https://wasmer.io/) to run wasm contracts.
//!
//! Contracts are compiled by a singlepass [store] carrying a [non_determinism_filter] and the
//! metering middleware ([cost]), and instantiated with [host_functions] bound to the
//! [environment](env) of the call. A contract exports `memory`, `alloc(u32) -> u32`, and one
//! function `_<method>` of type `() -> ()` per method.
//!
//! Compiled modules are kept in a [cache] so that only the first call of a contract pays for
//! compilation.

pub mod cache;

pub mod cost;

pub mod custom_tunables;

pub mod env;

pub mod host_functions;

pub mod instance;

pub mod memory;

pub mod module;

pub mod non_determinism_filter;

pub mod store;

use std::sync::Arc;

pub use instance::WasmInstance;

use self::cache::CodeCache;
use crate::code_provider::ContractCodeProvider;
use crate::config::WASMER_DRIVER;
use crate::context::ContextRef;
use crate::contract::{Instance, InstanceCreator};
use crate::error::BridgeError;
use crate::registry::{DriverRegistry, InstanceCreatorConfig};
use crate::syscall::SyscallService;
use crate::types::ContractType;

/// registers the wasmer driver.
pub fn register(registry: &DriverRegistry) -> Result<(), BridgeError> {
    registry.register(ContractType::Wasm, WASMER_DRIVER, |config: &InstanceCreatorConfig| {
        let creator: Arc<dyn InstanceCreator> = Arc::new(WasmCreator::new(config)?);
        Ok(creator)
    })
}

pub struct WasmCreator {
    syscall: Arc<SyscallService>,
    cache: CodeCache,
}

impl WasmCreator {
    pub fn new(config: &InstanceCreatorConfig) -> Result<Self, BridgeError> {
        let cache = if config.vm_config.disk_cache {
            CodeCache::with_disk(&config.basedir)?
        } else {
            CodeCache::in_memory()
        };
        Ok(Self {
            syscall: config.syscall.clone(),
            cache,
        })
    }
}

impl InstanceCreator for WasmCreator {
    fn create_instance(
        &self,
        ctx: &ContextRef,
        cp: Box<dyn ContractCodeProvider>,
    ) -> Result<Instance, BridgeError> {
        let (ctx_id, name, limits) = {
            let ctx = ctx.lock();
            (ctx.id, ctx.contract_name.clone(), ctx.resource_limits)
        };
        let desc = cp.get_contract_code_desc(&name)?;
        let artifact = self.cache.get_or_compile(&name, &desc.digest, cp.as_ref())?;

        let cpu_limit = u64::try_from(limits.cpu).unwrap_or_default();
        let memory_limit = usize::try_from(limits.memory).ok();
        let instance = WasmInstance::new(
            &artifact,
            ctx_id,
            self.syscall.clone(),
            cpu_limit,
            memory_limit,
        )?;
        Ok(Instance::Wasm(instance))
    }

    fn remove_cache(&self, contract_name: &str) {
        self.cache.remove(contract_name);
    }
}
