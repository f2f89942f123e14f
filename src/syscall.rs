/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! syscall defines the [SyscallService], the only way a running contract instance reaches the chain.
//!
//! Every operation is addressed by the [ContextId] of the calling instance and fails with
//! [BridgeError::BadContextId] if the context is not alive. Storage operations are scoped to the
//! bucket named after the calling contract.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use num_bigint::{BigInt, Sign};
use once_cell::sync::OnceCell;

use crate::bridge::VirtualMachine;
use crate::context::{ContextConfig, ContextId, ContextManager, ContextRef};
use crate::error::{BridgeError, ModelError};
use crate::limits::Limits;
use crate::types::{
    ArgPair, BlockInfo, CallArgs, ContractCallRequest, ContractEvent, IteratorItem, Response, TxInfo,
};

/// number of items returned by an iterator when the caller does not set a cap.
pub const DEFAULT_ITERATOR_CAP: usize = 1000;

/// number of contracts allowed on one call stack.
pub const MAX_CONTRACT_CALL_DEPTH: usize = 10;

/// VmManager resolves the virtual machine serving a nested contract call.
pub trait VmManager: Send + Sync {
    fn get_virtual_machine(&self, name: &str) -> Option<Arc<dyn VirtualMachine>>;
}

pub struct SyscallService {
    ctxmgr: Arc<ContextManager>,
    vmm: OnceCell<Weak<dyn VmManager>>,
    enable_debug_log: bool,
}

impl SyscallService {
    pub fn new(ctxmgr: Arc<ContextManager>, enable_debug_log: bool) -> Self {
        Self {
            ctxmgr,
            vmm: OnceCell::new(),
            enable_debug_log,
        }
    }

    /// binds the manager used by [SyscallService::contract_call]. Only the first binding is kept.
    pub fn bind_vm_manager(&self, vmm: Weak<dyn VmManager>) {
        let _ = self.vmm.set(vmm);
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.ctxmgr
    }

    /// resolves a live context.
    pub fn context(&self, id: ContextId) -> Result<ContextRef, BridgeError> {
        self.ctxmgr.context(id).ok_or(BridgeError::BadContextId(id))
    }

    pub fn get_object(&self, id: ContextId, key: &[u8]) -> Result<Option<Vec<u8>>, BridgeError> {
        let (cache, bucket) = {
            let ctx = self.context(id)?;
            let ctx = ctx.lock();
            (ctx.cache.clone(), ctx.contract_name.clone())
        };
        let result = cache.lock().get(&bucket, key);
        match result {
            Ok(data) => Ok(Some(data.value)),
            Err(ModelError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// stages a write. An empty value is rejected. If the write set of the call tree grows past the
    /// disk limit, the calling instance is aborted and the write stays staged.
    pub fn put_object(&self, id: ContextId, key: &[u8], value: &[u8]) -> Result<(), BridgeError> {
        let ctx = self.context(id)?;
        if value.is_empty() {
            return Err(BridgeError::PutNilValue);
        }
        let (cache, bucket) = {
            let ctx = ctx.lock();
            (ctx.cache.clone(), ctx.contract_name.clone())
        };
        cache.lock().put(&bucket, key, value)?;

        let ctx = ctx.lock();
        if ctx.exceed_disk_limit() {
            let reason = BridgeError::OutOfDiskLimit.to_string();
            if let Some(instance) = &ctx.instance {
                instance.abort(&reason);
            }
            tracing::warn!(ctx_id = %id, contract = %ctx.contract_name, "out of disk limit");
            return Err(BridgeError::OutOfDiskLimit);
        }
        Ok(())
    }

    pub fn delete_object(&self, id: ContextId, key: &[u8]) -> Result<(), BridgeError> {
        let (cache, bucket) = {
            let ctx = self.context(id)?;
            let ctx = ctx.lock();
            (ctx.cache.clone(), ctx.contract_name.clone())
        };
        let result = cache.lock().del(&bucket, key);
        Ok(result?)
    }

    /// range scan over `[start, limit)`. A non positive `cap` means [DEFAULT_ITERATOR_CAP].
    pub fn new_iterator(
        &self,
        id: ContextId,
        start: &[u8],
        limit: &[u8],
        cap: i32,
    ) -> Result<Vec<IteratorItem>, BridgeError> {
        let cap = if cap <= 0 {
            DEFAULT_ITERATOR_CAP
        } else {
            cap as usize
        };
        let (cache, bucket) = {
            let ctx = self.context(id)?;
            let ctx = ctx.lock();
            (ctx.cache.clone(), ctx.contract_name.clone())
        };

        let mut cache = cache.lock();
        let mut items = Vec::new();
        for data in cache.select(&bucket, start, limit)?.take(cap) {
            let data = data?;
            items.push(IteratorItem {
                key: data.key,
                value: data.value,
            });
        }
        Ok(items)
    }

    /// calls `req.contract` from the contract running in `id`.
    ///
    /// The callee runs with what is left of the caller's budget and shares its disk limit. Its
    /// usage is added to the caller once it finishes, whether it succeeded or not.
    pub fn contract_call(&self, id: ContextId, req: ContractCallRequest) -> Result<Response, BridgeError> {
        let nctx = self.context(id)?;
        let (cfg, contract_set) = {
            let ctx = nctx.lock();
            let contract_set = ctx.contract_set.clone();
            {
                let set = contract_set.lock();
                if set.contains(&req.contract) {
                    return Err(BridgeError::RecursiveCall);
                }
                if set.len() >= MAX_CONTRACT_CALL_DEPTH {
                    return Err(BridgeError::MaxDepthExceeded);
                }
            }

            let mut limits = ctx.resource_limits;
            limits.sub(ctx.resource_used());
            limits.disk = ctx.resource_limits.disk;

            let cfg = ContextConfig {
                cache: ctx.cache.clone(),
                core: ctx.core.clone(),
                initiator: ctx.initiator.clone(),
                auth_require: ctx.auth_require.clone(),
                contract_name: req.contract.clone(),
                resource_limits: limits,
                can_initialize: false,
                transfer_amount: String::new(),
                contract_set: Some(contract_set.clone()),
                contract_code_from_cache: false,
            };
            (cfg, contract_set)
        };

        let permitted = cfg
            .core
            .verify_contract_permission(&cfg.initiator, &cfg.auth_require, &req.contract, &req.method)
            .unwrap_or(false);
        if !permitted {
            return Err(BridgeError::PermissionDenied);
        }

        let vm = self
            .vmm
            .get()
            .and_then(Weak::upgrade)
            .and_then(|vmm| vmm.get_virtual_machine(&req.module))
            .ok_or_else(|| BridgeError::ModuleNotFound(req.module.clone()))?;

        let args: HashMap<String, Vec<u8>> = req
            .args
            .into_iter()
            .map(|ArgPair { key, value }| (key, value))
            .collect();

        contract_set.lock().insert(req.contract.clone());
        let (result, used) = match vm.new_context(cfg) {
            Ok(mut vctx) => {
                let result = vctx.invoke(&req.method, args);
                let used = vctx.resource_used();
                vctx.release();
                (result, used)
            }
            Err(e) => (Err(e), Limits::default()),
        };
        contract_set.lock().remove(&req.contract);

        nctx.lock().add_sub_resource_used(used);
        result
    }

    /// transfers `amount` from the calling contract to `to`.
    pub fn transfer(&self, id: ContextId, to: &str, amount: &str) -> Result<(), BridgeError> {
        let ctx = self.context(id)?;
        let amount: BigInt = amount.parse().map_err(|_| BridgeError::ParseAmount)?;
        if amount.sign() == Sign::Minus {
            return Err(BridgeError::NegativeAmount);
        }
        if to.is_empty() {
            return Err(BridgeError::EmptyToAddress);
        }
        let amount = amount.to_biguint().ok_or(BridgeError::NegativeAmount)?;
        let (cache, from) = {
            let ctx = ctx.lock();
            (ctx.cache.clone(), ctx.contract_name.clone())
        };
        let result = cache.lock().transfer(&from, to, &amount);
        Ok(result?)
    }

    /// queries a block by its hex encoded id.
    pub fn query_block(&self, id: ContextId, blockid: &str) -> Result<BlockInfo, BridgeError> {
        let core = self.context(id)?.lock().core.clone();
        let raw = hex::decode(blockid)?;
        let block = core.query_block(&raw)?;
        Ok(BlockInfo::from(&block))
    }

    /// queries a confirmed transaction by its hex encoded id.
    pub fn query_tx(&self, id: ContextId, txid: &str) -> Result<TxInfo, BridgeError> {
        let core = self.context(id)?.lock().core.clone();
        let raw = hex::decode(txid)?;
        let tx = core.query_transaction(&raw)?;
        if tx.blockid.is_empty() {
            return Err(BridgeError::UnconfirmedTx(txid.to_string()));
        }
        Ok(TxInfo::from(&tx))
    }

    /// arguments of the current call, sorted by key.
    pub fn get_call_args(&self, id: ContextId) -> Result<CallArgs, BridgeError> {
        let ctx = self.context(id)?;
        let ctx = ctx.lock();
        let mut args: Vec<ArgPair> = ctx
            .args
            .iter()
            .map(|(key, value)| ArgPair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        args.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(CallArgs {
            method: ctx.method.clone(),
            args,
            initiator: ctx.initiator.clone(),
            auth_require: ctx.auth_require.clone(),
            transfer_amount: ctx.transfer_amount.clone(),
        })
    }

    /// records the result of the call. The last write wins.
    pub fn set_output(&self, id: ContextId, response: Response) -> Result<(), BridgeError> {
        self.context(id)?.lock().output = Some(response);
        Ok(())
    }

    pub fn get_account_addresses(&self, id: ContextId, account: &str) -> Result<Vec<String>, BridgeError> {
        let core = self.context(id)?.lock().core.clone();
        Ok(core.get_account_addresses(account)?)
    }

    /// logs an entry on behalf of the contract.
    pub fn post_log(&self, id: ContextId, entry: &str) -> Result<(), BridgeError> {
        let ctx = self.context(id)?;
        if self.enable_debug_log {
            let contract = ctx.lock().contract_name.clone();
            tracing::info!(target: "xbridge::contract", contract = %contract, "{}", entry);
        }
        Ok(())
    }

    pub fn emit_event(&self, id: ContextId, name: &str, body: &[u8]) -> Result<(), BridgeError> {
        let ctx = self.context(id)?;
        let mut ctx = ctx.lock();
        let event = ContractEvent {
            contract: ctx.contract_name.clone(),
            name: name.to_string(),
            body: body.to_vec(),
        };
        ctx.events.push(event.clone());
        ctx.cache.lock().add_event(event);
        Ok(())
    }
}
