/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! registry defines the [DriverRegistry]: the table of runtime drivers compiled into the node.
//!
//! A registry is built once at process start, each driver registers its constructor, and the
//! registry is then handed to [XBridge::new](crate::bridge::XBridge::new) which opens the drivers
//! named in its configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::VmConfig;
use crate::contract::native::NativeCodeRegistry;
use crate::contract::{evm, native, wasm, InstanceCreator};
use crate::error::BridgeError;
use crate::syscall::SyscallService;
use crate::types::ContractType;

/// InstanceCreatorConfig is passed to a driver constructor when the driver is opened.
#[derive(Clone)]
pub struct InstanceCreatorConfig {
    /// directory private to the driver
    pub basedir: PathBuf,
    pub syscall: Arc<SyscallService>,
    pub vm_config: VmConfig,
}

pub type CreatorConstructor = dyn Fn(&InstanceCreatorConfig) -> Result<Arc<dyn InstanceCreator>, BridgeError>
    + Send
    + Sync;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: Mutex<HashMap<(ContractType, String), Arc<CreatorConstructor>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// registry with the drivers shipped with this crate: wasmer, the in-memory native driver
    /// serving `native_codes`, and rust-evm.
    pub fn with_builtin_drivers(native_codes: NativeCodeRegistry) -> Result<Self, BridgeError> {
        let registry = Self::new();
        wasm::register(&registry)?;
        native::register(&registry, native_codes)?;
        evm::register(&registry)?;
        Ok(registry)
    }

    /// registers a driver constructor. Registering the same (type, driver) twice fails; callers
    /// are expected to treat that as fatal at startup.
    pub fn register<F>(
        &self,
        contract_type: ContractType,
        driver: &str,
        constructor: F,
    ) -> Result<(), BridgeError>
    where
        F: Fn(&InstanceCreatorConfig) -> Result<Arc<dyn InstanceCreator>, BridgeError>
            + Send
            + Sync
            + 'static,
    {
        let mut drivers = self.drivers.lock();
        let key = (contract_type, driver.to_string());
        if drivers.contains_key(&key) {
            return Err(BridgeError::DriverExists {
                contract_type,
                driver: driver.to_string(),
            });
        }
        drivers.insert(key, Arc::new(constructor));
        Ok(())
    }

    /// opens a registered driver.
    pub fn open(
        &self,
        contract_type: ContractType,
        driver: &str,
        config: &InstanceCreatorConfig,
    ) -> Result<Arc<dyn InstanceCreator>, BridgeError> {
        let constructor = self
            .drivers
            .lock()
            .get(&(contract_type, driver.to_string()))
            .cloned()
            .ok_or_else(|| BridgeError::DriverNotFound {
                contract_type,
                driver: driver.to_string(),
            })?;
        constructor(config)
    }
}
