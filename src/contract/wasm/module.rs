/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Compilation of contract bytecode into a [wasmer::Module].

use super::non_determinism_filter::OPCODE_ERROR;
use crate::error::BridgeError;

/// compiles `bytecode` in `store`. The bytecode is validated, and rejected if it contains opcodes
/// refused by the non determinism filter.
pub fn compile(bytecode: &[u8], store: &wasmer::Store) -> Result<wasmer::Module, ModuleBuildError> {
    wasmer::Module::new(store, bytecode).map_err(|e| {
        let msg = e.to_string();
        if msg.contains(OPCODE_ERROR) {
            ModuleBuildError::DisallowedOpcodePresent
        } else {
            ModuleBuildError::Else(msg)
        }
    })
}

/// ModuleBuildError enumerates the reasons why bytecode fails to compile.
#[derive(Debug, thiserror::Error)]
pub enum ModuleBuildError {
    #[error("contract contains disallowed opcodes")]
    DisallowedOpcodePresent,

    #[error("{0}")]
    Else(String),
}

impl From<ModuleBuildError> for BridgeError {
    fn from(e: ModuleBuildError) -> Self {
        BridgeError::CodeLoad(e.to_string())
    }
}
