/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! types defines the data shared between the bridge, the runtimes and the syscall service.
//!
//! Types that cross the boundary into contract code (e.g. [CallArgs], [Response]) are borsh
//! serializable so that a wasm contract can decode them from linear memory.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Status of a successful contract response.
pub const STATUS_OK: i32 = 200;
/// Responses with status at or above this value are errors reported by the contract.
pub const STATUS_ERROR_THRESHOLD: i32 = 400;
/// Status used for failures raised by the system.
pub const STATUS_ERROR: i32 = 500;

/// The method reserved for contract initialization. Only callable from the deploy path.
pub const INITIALIZE_METHOD: &str = "initialize";

/// ContractType enumerates the supported contract runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Wasm,
    Native,
    Evm,
}

impl ContractType {
    pub const ALL: [ContractType; 3] = [ContractType::Wasm, ContractType::Native, ContractType::Evm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Wasm => "wasm",
            ContractType::Native => "native",
            ContractType::Evm => "evm",
        }
    }

    /// parse the runtime type string persisted in a contract descriptor. An empty string means wasm.
    pub fn from_desc_type(s: &str) -> Result<Self, BridgeError> {
        match s {
            "" | "wasm" => Ok(ContractType::Wasm),
            "native" => Ok(ContractType::Native),
            "evm" => Ok(ContractType::Evm),
            other => Err(BridgeError::UnknownContractType(other.to_string())),
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ContractCodeDesc is the descriptor persisted for every deployed contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractCodeDesc {
    /// runtime type string, see [ContractType::from_desc_type]
    pub contract_type: String,
    /// source language hint, e.g. "c" or "go"
    pub runtime: String,
    pub compiler: String,
    /// double sha256 of the contract code
    pub digest: Vec<u8>,
}

impl ContractCodeDesc {
    pub fn contract_type(&self) -> Result<ContractType, BridgeError> {
        ContractType::from_desc_type(&self.contract_type)
    }
}

/// Response is the result of a contract method.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            body: body.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR,
            message: message.into(),
            body: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= STATUS_ERROR_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ArgPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// CallArgs is the view of the current call presented to contract code. `args` is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CallArgs {
    pub method: String,
    pub args: Vec<ArgPair>,
    pub initiator: String,
    pub auth_require: Vec<String>,
    pub transfer_amount: String,
}

impl CallArgs {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.args
            .binary_search_by(|pair| pair.key.as_str().cmp(key))
            .ok()
            .map(|i| self.args[i].value.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IteratorItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// ContractEvent is emitted by a contract during a call.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractEvent {
    pub contract: String,
    pub name: String,
    pub body: Vec<u8>,
}

/// ContractCallRequest is the input of a nested contract call issued from contract code.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractCallRequest {
    /// name of the virtual machine handling the call, e.g. "wasm"
    pub module: String,
    pub contract: String,
    pub method: String,
    pub args: Vec<ArgPair>,
}

/// Block as returned by the chain core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub blockid: Vec<u8>,
    pub pre_hash: Vec<u8>,
    pub proposer: String,
    pub sign: Vec<u8>,
    pub pubkey: String,
    pub height: i64,
    pub timestamp: i64,
    pub txids: Vec<Vec<u8>>,
    pub in_trunk: bool,
    pub next_hash: Vec<u8>,
}

/// Transaction as returned by the chain core. An empty `blockid` means the transaction is not confirmed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub txid: Vec<u8>,
    pub blockid: Vec<u8>,
    pub desc: Vec<u8>,
    pub initiator: String,
    pub auth_require: Vec<String>,
}

/// BlockInfo is the contract facing view of a [Block]. Hashes are hex encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockInfo {
    pub blockid: String,
    pub pre_hash: String,
    pub proposer: String,
    pub sign: String,
    pub pubkey: String,
    pub height: i64,
    pub txids: Vec<String>,
    pub tx_count: i32,
    pub in_trunk: bool,
    pub next_hash: String,
}

impl From<&Block> for BlockInfo {
    fn from(block: &Block) -> Self {
        Self {
            blockid: hex::encode(&block.blockid),
            pre_hash: hex::encode(&block.pre_hash),
            proposer: block.proposer.clone(),
            sign: hex::encode(&block.sign),
            pubkey: block.pubkey.clone(),
            height: block.height,
            txids: block.txids.iter().map(hex::encode).collect(),
            tx_count: block.txids.len() as i32,
            in_trunk: block.in_trunk,
            next_hash: hex::encode(&block.next_hash),
        }
    }
}

/// TxInfo is the contract facing view of a [Transaction].
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxInfo {
    pub txid: String,
    pub blockid: String,
    pub desc: Vec<u8>,
    pub initiator: String,
    pub auth_require: Vec<String>,
}

impl From<&Transaction> for TxInfo {
    fn from(tx: &Transaction) -> Self {
        Self {
            txid: hex::encode(&tx.txid),
            blockid: hex::encode(&tx.blockid),
            desc: tx.desc.clone(),
            initiator: tx.initiator.clone(),
            auth_require: tx.auth_require.clone(),
        }
    }
}
