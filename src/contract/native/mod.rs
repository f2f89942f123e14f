/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Native contracts: Rust contracts compiled into the node.
//!
//! A native contract implements [NativeContract] and is registered under a code name in a
//! [NativeCodeRegistry]. Deploying a native contract stores that code name as the contract code;
//! creating an instance looks the name up in the registry.
//!
//! Contracts reach the chain through [NativeContext], which wraps the syscall service and charges
//! a fixed cpu cost per syscall.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::code_provider::ContractCodeProvider;
use crate::config::NATIVE_MEMORY_DRIVER;
use crate::context::{ContextId, ContextRef};
use crate::contract::{Instance, InstanceCreator, InstanceHandle};
use crate::error::BridgeError;
use crate::registry::{DriverRegistry, InstanceCreatorConfig};
use crate::syscall::SyscallService;
use crate::types::{
    ArgPair, BlockInfo, CallArgs, ContractCallRequest, ContractType, IteratorItem, Response, TxInfo,
};

/// cpu charged for each syscall made by a native contract.
pub const NATIVE_SYSCALL_COST: i64 = 100;

/// NativeContract is implemented by contracts compiled into the node.
pub trait NativeContract: Send + Sync {
    /// runs `method`. Failures reported by the contract itself are responses with an error status;
    /// an `Err` aborts the call.
    fn invoke(&self, method: &str, ctx: &mut NativeContext) -> Result<Response, BridgeError>;
}

/// NativeCodeRegistry maps code names to native contract implementations.
#[derive(Clone, Default)]
pub struct NativeCodeRegistry {
    codes: Arc<Mutex<HashMap<String, Arc<dyn NativeContract>>>>,
}

impl NativeCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// registers `contract` under `code`, replacing any previous registration.
    pub fn register(&self, code: &str, contract: Arc<dyn NativeContract>) {
        self.codes.lock().insert(code.to_string(), contract);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn NativeContract>> {
        self.codes.lock().get(code).cloned()
    }
}

/// registers the in-memory native driver serving the contracts of `codes`.
pub fn register(registry: &DriverRegistry, codes: NativeCodeRegistry) -> Result<(), BridgeError> {
    registry.register(
        ContractType::Native,
        NATIVE_MEMORY_DRIVER,
        move |config: &InstanceCreatorConfig| {
            let creator: Arc<dyn InstanceCreator> = Arc::new(NativeCreator::new(config, codes.clone()));
            Ok(creator)
        },
    )
}

struct LoadedCode {
    digest: Vec<u8>,
    contract: Arc<dyn NativeContract>,
}

pub struct NativeCreator {
    syscall: Arc<SyscallService>,
    codes: NativeCodeRegistry,
    loaded: Mutex<HashMap<String, LoadedCode>>,
}

impl NativeCreator {
    pub fn new(config: &InstanceCreatorConfig, codes: NativeCodeRegistry) -> Self {
        Self {
            syscall: config.syscall.clone(),
            codes,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn load(
        &self,
        name: &str,
        cp: &dyn ContractCodeProvider,
    ) -> Result<Arc<dyn NativeContract>, BridgeError> {
        let desc = cp.get_contract_code_desc(name)?;
        if let Some(loaded) = self.loaded.lock().get(name) {
            if loaded.digest == desc.digest {
                return Ok(loaded.contract.clone());
            }
        }

        let code = cp.get_contract_code(name)?;
        let code = String::from_utf8(code)
            .map_err(|_| BridgeError::CodeLoad("native code name is not utf8".to_string()))?;
        let contract = self
            .codes
            .get(&code)
            .ok_or_else(|| BridgeError::CodeLoad(format!("native code {code} not registered")))?;
        self.loaded.lock().insert(
            name.to_string(),
            LoadedCode {
                digest: desc.digest,
                contract: contract.clone(),
            },
        );
        Ok(contract)
    }
}

impl InstanceCreator for NativeCreator {
    fn create_instance(
        &self,
        ctx: &ContextRef,
        cp: Box<dyn ContractCodeProvider>,
    ) -> Result<Instance, BridgeError> {
        let (ctx_id, name) = {
            let ctx = ctx.lock();
            (ctx.id, ctx.contract_name.clone())
        };
        let contract = self.load(&name, cp.as_ref())?;
        Ok(Instance::Native(NativeInstance {
            contract: Some(contract),
            ctx_id,
            syscall: self.syscall.clone(),
            handle: Arc::new(InstanceHandle::default()),
        }))
    }

    fn remove_cache(&self, contract_name: &str) {
        self.loaded.lock().remove(contract_name);
    }
}

pub struct NativeInstance {
    contract: Option<Arc<dyn NativeContract>>,
    ctx_id: ContextId,
    syscall: Arc<SyscallService>,
    handle: Arc<InstanceHandle>,
}

impl NativeInstance {
    pub fn handle(&self) -> &Arc<InstanceHandle> {
        &self.handle
    }

    pub fn exec(&mut self) -> Result<(), BridgeError> {
        let contract = self
            .contract
            .clone()
            .ok_or_else(|| BridgeError::Runtime("instance released".to_string()))?;
        let mut ctx = NativeContext {
            ctx_id: self.ctx_id,
            syscall: self.syscall.clone(),
            handle: self.handle.clone(),
        };
        ctx.charge()?;
        let args = self.syscall.get_call_args(self.ctx_id)?;

        let response = contract.invoke(&args.method, &mut ctx)?;
        // a contract swallowing the error of an aborting syscall still fails
        self.handle.check_aborted()?;
        self.syscall.set_output(self.ctx_id, response)
    }

    pub fn release(&mut self) {
        self.contract = None;
    }
}

/// NativeContext is the view of the chain given to a running native contract.
pub struct NativeContext {
    ctx_id: ContextId,
    syscall: Arc<SyscallService>,
    handle: Arc<InstanceHandle>,
}

impl NativeContext {
    // Charges one syscall and fails once the call tree has used up the cpu limit.
    fn charge(&self) -> Result<(), BridgeError> {
        self.handle.check_aborted()?;
        self.handle.add_cpu(NATIVE_SYSCALL_COST);
        let ctx = self.syscall.context(self.ctx_id)?;
        let ctx = ctx.lock();
        if ctx.resource_used().cpu > ctx.resource_limits.cpu {
            self.handle.abort(&BridgeError::OutOfCpuLimit.to_string());
            return Err(BridgeError::OutOfCpuLimit);
        }
        Ok(())
    }

    pub fn call_args(&self) -> Result<CallArgs, BridgeError> {
        self.charge()?;
        self.syscall.get_call_args(self.ctx_id)
    }

    /// the value of one call argument.
    pub fn arg(&self, key: &str) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(self.call_args()?.get(key).map(<[u8]>::to_vec))
    }

    pub fn initiator(&self) -> Result<String, BridgeError> {
        Ok(self.call_args()?.initiator)
    }

    pub fn get_object(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BridgeError> {
        self.charge()?;
        self.syscall.get_object(self.ctx_id, key)
    }

    pub fn put_object(&self, key: &[u8], value: &[u8]) -> Result<(), BridgeError> {
        self.charge()?;
        self.syscall.put_object(self.ctx_id, key, value)
    }

    pub fn delete_object(&self, key: &[u8]) -> Result<(), BridgeError> {
        self.charge()?;
        self.syscall.delete_object(self.ctx_id, key)
    }

    pub fn new_iterator(&self, start: &[u8], limit: &[u8], cap: i32) -> Result<Vec<IteratorItem>, BridgeError> {
        self.charge()?;
        self.syscall.new_iterator(self.ctx_id, start, limit, cap)
    }

    /// calls another contract. Failures of the callee are returned as errors.
    pub fn call(
        &self,
        module: &str,
        contract: &str,
        method: &str,
        args: Vec<(String, Vec<u8>)>,
    ) -> Result<Response, BridgeError> {
        self.charge()?;
        let req = ContractCallRequest {
            module: module.to_string(),
            contract: contract.to_string(),
            method: method.to_string(),
            args: args
                .into_iter()
                .map(|(key, value)| ArgPair { key, value })
                .collect(),
        };
        self.syscall.contract_call(self.ctx_id, req)
    }

    pub fn transfer(&self, to: &str, amount: &str) -> Result<(), BridgeError> {
        self.charge()?;
        self.syscall.transfer(self.ctx_id, to, amount)
    }

    pub fn query_block(&self, blockid: &str) -> Result<BlockInfo, BridgeError> {
        self.charge()?;
        self.syscall.query_block(self.ctx_id, blockid)
    }

    pub fn query_tx(&self, txid: &str) -> Result<TxInfo, BridgeError> {
        self.charge()?;
        self.syscall.query_tx(self.ctx_id, txid)
    }

    pub fn get_account_addresses(&self, account: &str) -> Result<Vec<String>, BridgeError> {
        self.charge()?;
        self.syscall.get_account_addresses(self.ctx_id, account)
    }

    pub fn emit_event(&self, name: &str, body: &[u8]) -> Result<(), BridgeError> {
        self.charge()?;
        self.syscall.emit_event(self.ctx_id, name, body)
    }

    pub fn log(&self, entry: &str) -> Result<(), BridgeError> {
        self.charge()?;
        self.syscall.post_log(self.ctx_id, entry)
    }
}
