/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Runs evm contracts with the rust-ethereum interpreter.
//!
//! `initialize` runs the deployed code as a constructor and stores the runtime bytecode it
//! returns as the contract code. Any other method runs the stored bytecode with the call data
//! taken from the `input` argument. When `jsonEncoded` is `"true"`, `input` is instead a JSON
//! object of named arguments encoded with the contract [abi], and the result is decoded back into
//! JSON. In that mode the deployed code is hex text.
//!
//! Storage changes, value moved out of contracts and logs are applied to the model cache only when
//! the execution succeeds.
//! Gas used by the interpreter is reported as cpu.

pub mod abi;

pub mod address;

pub mod backend;

use std::sync::Arc;

use evm::backend::Log;
use evm::executor::stack::{MemoryStackState, StackExecutor, StackSubstateMetadata};
use evm::{Config, ExitError, ExitReason};
use primitive_types::U256;

use self::address::{contract_name_to_evm_address, determine_evm_address, initiator_to_evm_address};
use self::backend::{collect_changes, ModelBackend};
use crate::code_provider::{contract_abi_key, contract_code_key, ContractCodeProvider, CONTRACT_BUCKET};
use crate::config::RUST_EVM_DRIVER;
use crate::context::{ContextId, ContextRef};
use crate::contract::{Instance, InstanceCreator, InstanceHandle};
use crate::error::BridgeError;
use crate::limits::Limits;
use crate::model::ModelCacheRef;
use crate::registry::{DriverRegistry, InstanceCreatorConfig};
use crate::syscall::SyscallService;
use crate::types::{ContractEvent, ContractType, Response, INITIALIZE_METHOD, STATUS_ERROR};

/// argument holding the call data, or the JSON arguments in JSON mode
pub const EVM_INPUT: &str = "input";
/// argument switching to JSON mode when set to `"true"`
pub const EVM_JSON_ENCODED: &str = "jsonEncoded";

// selector of `Error(string)`, the payload of a revert with reason
const REVERT_REASON_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// registers the rust-evm driver.
pub fn register(registry: &DriverRegistry) -> Result<(), BridgeError> {
    registry.register(ContractType::Evm, RUST_EVM_DRIVER, |config: &InstanceCreatorConfig| {
        let creator: Arc<dyn InstanceCreator> = Arc::new(EvmCreator {
            syscall: config.syscall.clone(),
        });
        Ok(creator)
    })
}

pub struct EvmCreator {
    syscall: Arc<SyscallService>,
}

impl InstanceCreator for EvmCreator {
    fn create_instance(
        &self,
        ctx: &ContextRef,
        cp: Box<dyn ContractCodeProvider>,
    ) -> Result<Instance, BridgeError> {
        let (ctx_id, name) = {
            let ctx = ctx.lock();
            (ctx.id, ctx.contract_name.clone())
        };
        let code = cp.get_contract_code(&name)?;
        let abi = cp.get_contract_abi(&name).ok();
        Ok(Instance::Evm(EvmInstance {
            ctx_id,
            syscall: self.syscall.clone(),
            code,
            abi,
            handle: Arc::new(InstanceHandle::default()),
        }))
    }

    // Nothing is compiled ahead of time.
    fn remove_cache(&self, _contract_name: &str) {}
}

pub struct EvmInstance {
    ctx_id: ContextId,
    syscall: Arc<SyscallService>,
    code: Vec<u8>,
    abi: Option<Vec<u8>>,
    handle: Arc<InstanceHandle>,
}

/// what one exec needs from the context, copied out so that no context lock is held while the
/// interpreter runs.
struct CallFrame {
    contract_name: String,
    method: String,
    input: Option<Vec<u8>>,
    json_encoded: bool,
    initiator: String,
    transfer_amount: String,
    cpu_limit: u64,
}

impl EvmInstance {
    pub fn handle(&self) -> &Arc<InstanceHandle> {
        &self.handle
    }

    pub fn exec(&mut self) -> Result<(), BridgeError> {
        self.handle.check_aborted()?;
        let ctx = self.syscall.context(self.ctx_id)?;
        let (frame, cache, core) = {
            let ctx = ctx.lock();
            let frame = CallFrame {
                contract_name: ctx.contract_name.clone(),
                method: ctx.method.clone(),
                input: ctx.args.get(EVM_INPUT).cloned(),
                json_encoded: ctx.args.get(EVM_JSON_ENCODED).map(Vec::as_slice) == Some(b"true".as_slice()),
                initiator: ctx.initiator.clone(),
                transfer_amount: ctx.transfer_amount.clone(),
                cpu_limit: u64::try_from(ctx.resource_limits.cpu).unwrap_or_default(),
            };
            (frame, ctx.cache.clone(), ctx.core.clone())
        };

        let caller = initiator_to_evm_address(&frame.initiator)?;
        let callee = contract_name_to_evm_address(&frame.contract_name)?;
        let abi = match (&self.abi, frame.json_encoded) {
            (Some(abi), _) => Some(abi::load(abi)?),
            (None, true) => return Err(BridgeError::Abi("contract abi not found".to_string())),
            (None, false) => None,
        };
        let initialize = frame.method == INITIALIZE_METHOD;

        let (code, data, value) = if initialize {
            let code = match &abi {
                Some(abi) if frame.json_encoded => {
                    let text = String::from_utf8_lossy(&self.code);
                    let code = hex::decode(text.trim().trim_start_matches("0x"))?;
                    abi::encode_constructor(abi, code, frame.input.as_deref())?
                }
                _ => self.code.clone(),
            };
            (code, Vec::new(), U256::zero())
        } else {
            let data = match &abi {
                Some(abi) if frame.json_encoded => abi::encode_call(abi, &frame.method, frame.input.as_deref())?,
                _ => frame.input.clone().unwrap_or_default(),
            };
            (self.code.clone(), data, parse_value(&frame.transfer_amount)?)
        };

        let mut backend = ModelBackend::new(cache.clone(), core, caller, frame.cpu_limit, (callee, code));
        let (reason, out, used, changes, logs) = {
            let config = Config::istanbul();
            let metadata = StackSubstateMetadata::new(frame.cpu_limit, &config);
            let state = MemoryStackState::new(metadata, &mut backend);
            let precompiles = ();
            let mut executor = StackExecutor::new_with_precompiles(state, &config, &precompiles);
            let (reason, out) = executor.transact_call(caller, callee, value, data, frame.cpu_limit, Vec::new());
            let used = executor.used_gas();
            let (values, logs) = executor.into_state().deconstruct();
            (reason, out, used, collect_changes(values), logs.into_iter().collect::<Vec<Log>>())
        };

        self.handle.set_usage(Limits {
            cpu: i64::try_from(used).unwrap_or(i64::MAX),
            ..Limits::default()
        });
        check_exit(reason, &out)?;

        backend.apply(&changes, (caller, callee, value))?;
        self.emit_logs(&ctx, &cache, &frame.contract_name, abi.as_ref(), logs);

        let response = if initialize {
            cache
                .lock()
                .put(CONTRACT_BUCKET, &contract_code_key(&frame.contract_name), &out)?;
            Response::ok(Vec::new())
        } else {
            match &abi {
                Some(abi) if frame.json_encoded && abi.function(&frame.method).is_ok() => {
                    Response::ok(abi::decode_output(abi, &frame.method, &out)?)
                }
                _ => Response::ok(out),
            }
        };

        if ctx.lock().exceed_disk_limit() {
            return Err(BridgeError::OutOfDiskLimit);
        }
        self.handle.check_aborted()?;
        tracing::debug!(contract = %frame.contract_name, method = %frame.method, gas = used, "evm call finished");
        self.syscall.set_output(self.ctx_id, response)
    }

    /// the interpreter keeps no state between calls.
    pub fn release(&mut self) {}

    // Logs decode with the ABI of the contract that emitted them; unknown ones keep their raw data
    // and are named after their first topic.
    fn emit_logs<L>(
        &self,
        ctx: &ContextRef,
        cache: &ModelCacheRef,
        contract_name: &str,
        own_abi: Option<&ethabi::Contract>,
        logs: L,
    ) where
        L: IntoIterator<Item = Log>,
    {
        for log in logs {
            let emitter = match determine_evm_address(&log.address) {
                Ok((name, _)) => name,
                Err(_) => continue,
            };
            let decoded = if emitter == contract_name {
                own_abi.and_then(|abi| abi::decode_event(abi, &log.topics, &log.data))
            } else {
                let stored = cache.lock().get(CONTRACT_BUCKET, &contract_abi_key(&emitter)).ok();
                stored
                    .and_then(|data| abi::load(&data.value).ok())
                    .and_then(|abi| abi::decode_event(&abi, &log.topics, &log.data))
            };
            let (name, body) = decoded.unwrap_or_else(|| {
                let name = log.topics.first().map(|t| hex::encode(t.as_bytes())).unwrap_or_default();
                (name, log.data.clone())
            });

            let event = ContractEvent {
                contract: emitter,
                name,
                body,
            };
            ctx.lock().events.push(event.clone());
            cache.lock().add_event(event);
        }
    }
}

fn check_exit(reason: ExitReason, out: &[u8]) -> Result<(), BridgeError> {
    match reason {
        ExitReason::Succeed(_) => Ok(()),
        ExitReason::Error(ExitError::OutOfGas) => Err(BridgeError::OutOfCpuLimit),
        ExitReason::Error(e) => Err(BridgeError::Runtime(format!("evm error: {e:?}"))),
        ExitReason::Fatal(e) => Err(BridgeError::Runtime(format!("evm fatal: {e:?}"))),
        ExitReason::Revert(_) => Err(BridgeError::Contract {
            status: STATUS_ERROR,
            message: revert_reason(out),
        }),
    }
}

fn revert_reason(out: &[u8]) -> String {
    if out.len() > 4 && out[..4] == REVERT_REASON_SELECTOR {
        if let Ok(tokens) = ethabi::decode(&[ethabi::ParamType::String], &out[4..]) {
            if let Some(ethabi::Token::String(reason)) = tokens.into_iter().next() {
                return reason;
            }
        }
    }
    format!("execution reverted: {}", hex::encode(out))
}

/// a transfer amount in decimal, or hex with a `0x` prefix. Empty means zero.
fn parse_value(amount: &str) -> Result<U256, BridgeError> {
    if amount.is_empty() {
        return Ok(U256::zero());
    }
    let value = match amount.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(amount).ok(),
    };
    value.ok_or(BridgeError::ParseAmount)
}
