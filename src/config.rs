/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! config defines the configuration of [XBridge](crate::bridge::XBridge) and of the runtime drivers it opens.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ContractType;

/// Default driver names of the runtimes shipped with this crate.
pub const WASMER_DRIVER: &str = "wasmer";
pub const NATIVE_MEMORY_DRIVER: &str = "memory";
pub const RUST_EVM_DRIVER: &str = "rust-evm";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XBridgeConfig {
    /// root directory of driver data, each driver gets `<basedir>/<driver>`
    pub basedir: PathBuf,

    /// runtime types missing from this map are not opened
    pub vm_configs: HashMap<ContractType, VmConfig>,

    #[serde(default)]
    pub enable_upgrade: bool,

    /// emit logs posted by contracts
    #[serde(default)]
    pub enable_debug_log: bool,
}

impl Default for XBridgeConfig {
    fn default() -> Self {
        Self {
            basedir: PathBuf::new(),
            vm_configs: HashMap::from([
                (ContractType::Wasm, VmConfig::new(WASMER_DRIVER)),
                (ContractType::Native, VmConfig::new(NATIVE_MEMORY_DRIVER)),
                (ContractType::Evm, VmConfig::new(RUST_EVM_DRIVER)),
            ]),
            enable_upgrade: false,
            enable_debug_log: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub enable: bool,
    pub driver: String,

    /// wasm only: keep compiled modules on disk under the driver directory
    #[serde(default)]
    pub disk_cache: bool,
}

impl VmConfig {
    pub fn new(driver: &str) -> Self {
        Self {
            enable: true,
            driver: driver.to_string(),
            disk_cache: false,
        }
    }

    pub fn disabled(driver: &str) -> Self {
        Self {
            enable: false,
            ..Self::new(driver)
        }
    }
}
