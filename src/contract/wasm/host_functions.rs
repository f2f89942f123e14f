/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Host functions imported by wasm contracts from the `env` module.
//!
//! Arguments suffixed with `_ptr`/`_len` locate an input in guest memory. Arguments suffixed with
//! `_ptr_ptr` locate a u32 slot where the host writes the offset of an output it allocated with the
//! contract's `alloc`; such functions return the length of the output. Structured values
//! ([CallArgs], [ContractCallRequest], [Response], iterator items, block and tx info) cross the
//! boundary borsh encoded.
//!
//! A failing host function traps the instance, with the exception of `contract_call`: the failure
//! of a sub call is handed back to the caller as an error [Response].

use borsh::{BorshDeserialize, BorshSerialize};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};
use wasmer::{imports, Function, ImportObject, Store};

use super::cost::{CRYPTO_PER_BYTE_COST, HOST_CALL_BASE_COST};
use super::env::Env;
use crate::error::BridgeError;
use crate::types::{ContractCallRequest, Response};

/// FuncError is the error of a host function. It traps the calling instance.
#[derive(Debug, thiserror::Error)]
pub enum FuncError {
    #[error("Runtime: {0}")]
    Runtime(anyhow::Error),

    #[error("GasExhaustionError")]
    GasExhaustionError,

    /// failure of a syscall, surfaced unchanged as the result of the instance
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<wasmer::RuntimeError> for FuncError {
    fn from(e: wasmer::RuntimeError) -> Self {
        Self::Runtime(e.into())
    }
}

impl From<anyhow::Error> for FuncError {
    fn from(e: anyhow::Error) -> Self {
        Self::Runtime(e)
    }
}

impl From<std::io::Error> for FuncError {
    fn from(e: std::io::Error) -> Self {
        Self::Runtime(e.into())
    }
}

fn begin(env: &Env) -> Result<(), FuncError> {
    env.handle.check_aborted()?;
    env.consume_cpu(HOST_CALL_BASE_COST)
}

fn get_object(env: &Env, key_ptr: u32, key_len: u32, val_ptr_ptr: u32) -> Result<i64, FuncError> {
    begin(env)?;
    let key = env.read_bytes(key_ptr, key_len)?;
    match env.syscall.get_object(env.ctx_id, &key)? {
        Some(value) => Ok(env.write_bytes(&value, val_ptr_ptr)? as i64),
        None => Ok(-1),
    }
}

fn put_object(env: &Env, key_ptr: u32, key_len: u32, val_ptr: u32, val_len: u32) -> Result<(), FuncError> {
    begin(env)?;
    let key = env.read_bytes(key_ptr, key_len)?;
    let value = env.read_bytes(val_ptr, val_len)?;
    env.syscall.put_object(env.ctx_id, &key, &value)?;
    Ok(())
}

fn delete_object(env: &Env, key_ptr: u32, key_len: u32) -> Result<(), FuncError> {
    begin(env)?;
    let key = env.read_bytes(key_ptr, key_len)?;
    env.syscall.delete_object(env.ctx_id, &key)?;
    Ok(())
}

fn new_iterator(
    env: &Env,
    start_ptr: u32,
    start_len: u32,
    limit_ptr: u32,
    limit_len: u32,
    cap: i32,
    items_ptr_ptr: u32,
) -> Result<u32, FuncError> {
    begin(env)?;
    let start = env.read_bytes(start_ptr, start_len)?;
    let limit = env.read_bytes(limit_ptr, limit_len)?;
    let items = env.syscall.new_iterator(env.ctx_id, &start, &limit, cap)?;
    env.write_bytes(&items.try_to_vec()?, items_ptr_ptr)
}

fn call_args(env: &Env, args_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let args = env.syscall.get_call_args(env.ctx_id)?;
    env.write_bytes(&args.try_to_vec()?, args_ptr_ptr)
}

/// the value of one call argument, -1 if the argument is absent.
fn argument(env: &Env, key_ptr: u32, key_len: u32, val_ptr_ptr: u32) -> Result<i64, FuncError> {
    begin(env)?;
    let key = env.read_string(key_ptr, key_len)?;
    let args = env.syscall.get_call_args(env.ctx_id)?;
    match args.get(&key) {
        Some(value) => Ok(env.write_bytes(value, val_ptr_ptr)? as i64),
        None => Ok(-1),
    }
}

fn set_output(
    env: &Env,
    status: i32,
    msg_ptr: u32,
    msg_len: u32,
    body_ptr: u32,
    body_len: u32,
) -> Result<(), FuncError> {
    begin(env)?;
    let message = env.read_string(msg_ptr, msg_len)?;
    let body = env.read_bytes(body_ptr, body_len)?;
    env.syscall.set_output(
        env.ctx_id,
        Response {
            status,
            message,
            body,
        },
    )?;
    Ok(())
}

fn contract_call(env: &Env, req_ptr: u32, req_len: u32, resp_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let req = env.read_bytes(req_ptr, req_len)?;
    let req = ContractCallRequest::try_from_slice(&req)?;

    // the callee budget is computed from the usage published on the handle
    env.sync_usage();
    let ctx = env.syscall.context(env.ctx_id)?;
    let sub_cpu_before = ctx.lock().sub_resource_used.cpu;

    let response = match env.syscall.contract_call(env.ctx_id, req) {
        Ok(response) => response,
        Err(e) => Response::from(&e),
    };
    env.handle.check_aborted()?;

    let sub_cpu = ctx.lock().sub_resource_used.cpu.saturating_sub(sub_cpu_before);
    env.consume_external_cpu(sub_cpu.max(0) as u64)?;

    env.write_bytes(&response.try_to_vec()?, resp_ptr_ptr)
}

fn transfer(env: &Env, to_ptr: u32, to_len: u32, amount_ptr: u32, amount_len: u32) -> Result<(), FuncError> {
    begin(env)?;
    let to = env.read_string(to_ptr, to_len)?;
    let amount = env.read_string(amount_ptr, amount_len)?;
    env.syscall.transfer(env.ctx_id, &to, &amount)?;
    Ok(())
}

fn query_block(env: &Env, id_ptr: u32, id_len: u32, block_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let blockid = env.read_string(id_ptr, id_len)?;
    let block = env.syscall.query_block(env.ctx_id, &blockid)?;
    env.write_bytes(&block.try_to_vec()?, block_ptr_ptr)
}

fn query_tx(env: &Env, id_ptr: u32, id_len: u32, tx_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let txid = env.read_string(id_ptr, id_len)?;
    let tx = env.syscall.query_tx(env.ctx_id, &txid)?;
    env.write_bytes(&tx.try_to_vec()?, tx_ptr_ptr)
}

fn get_account_addresses(env: &Env, account_ptr: u32, account_len: u32, addrs_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let account = env.read_string(account_ptr, account_len)?;
    let addresses = env.syscall.get_account_addresses(env.ctx_id, &account)?;
    env.write_bytes(&addresses.try_to_vec()?, addrs_ptr_ptr)
}

fn emit_event(env: &Env, name_ptr: u32, name_len: u32, body_ptr: u32, body_len: u32) -> Result<(), FuncError> {
    begin(env)?;
    let name = env.read_string(name_ptr, name_len)?;
    let body = env.read_bytes(body_ptr, body_len)?;
    env.syscall.emit_event(env.ctx_id, &name, &body)?;
    Ok(())
}

fn log(env: &Env, entry_ptr: u32, entry_len: u32) -> Result<(), FuncError> {
    begin(env)?;
    let entry = env.read_bytes(entry_ptr, entry_len)?;
    env.syscall
        .post_log(env.ctx_id, &String::from_utf8_lossy(&entry))?;
    Ok(())
}

fn sha256(env: &Env, msg_ptr: u32, msg_len: u32, digest_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let input = env.read_bytes(msg_ptr, msg_len)?;
    env.consume_cpu(CRYPTO_PER_BYTE_COST * input.len() as u64)?;
    let digest = Sha256::digest(&input);
    env.write_bytes(&digest, digest_ptr_ptr)
}

fn keccak256(env: &Env, msg_ptr: u32, msg_len: u32, digest_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let input = env.read_bytes(msg_ptr, msg_len)?;
    env.consume_cpu(CRYPTO_PER_BYTE_COST * input.len() as u64)?;
    let mut digest = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(&input);
    keccak.finalize(&mut digest);
    env.write_bytes(&digest, digest_ptr_ptr)
}

fn ripemd160(env: &Env, msg_ptr: u32, msg_len: u32, digest_ptr_ptr: u32) -> Result<u32, FuncError> {
    begin(env)?;
    let input = env.read_bytes(msg_ptr, msg_len)?;
    env.consume_cpu(CRYPTO_PER_BYTE_COST * input.len() as u64)?;
    let digest = Ripemd160::digest(&input);
    env.write_bytes(&digest, digest_ptr_ptr)
}

/// import object exposing every host function to an instance.
pub fn imports(store: &Store, env: &Env) -> ImportObject {
    imports! {
        "env" => {
            "get_object" => Function::new_native_with_env(store, env.clone(), get_object),
            "put_object" => Function::new_native_with_env(store, env.clone(), put_object),
            "delete_object" => Function::new_native_with_env(store, env.clone(), delete_object),
            "new_iterator" => Function::new_native_with_env(store, env.clone(), new_iterator),

            "call_args" => Function::new_native_with_env(store, env.clone(), call_args),
            "argument" => Function::new_native_with_env(store, env.clone(), argument),
            "set_output" => Function::new_native_with_env(store, env.clone(), set_output),

            "contract_call" => Function::new_native_with_env(store, env.clone(), contract_call),
            "transfer" => Function::new_native_with_env(store, env.clone(), transfer),

            "query_block" => Function::new_native_with_env(store, env.clone(), query_block),
            "query_tx" => Function::new_native_with_env(store, env.clone(), query_tx),
            "get_account_addresses" => Function::new_native_with_env(store, env.clone(), get_account_addresses),

            "emit_event" => Function::new_native_with_env(store, env.clone(), emit_event),
            "log" => Function::new_native_with_env(store, env.clone(), log),

            "sha256" => Function::new_native_with_env(store, env.clone(), sha256),
            "keccak256" => Function::new_native_with_env(store, env.clone(), keccak256),
            "ripemd160" => Function::new_native_with_env(store, env.clone(), ripemd160),
        }
    }
}
