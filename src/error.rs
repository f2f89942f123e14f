/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! error defines the error definitions surfaced by the contract execution layer.
//!
//! Errors fall into four families:
//! 1. validation errors (bad arguments, duplicate deploy, unknown contract or runtime type),
//! 2. resource errors (limits, recursion depth, reentrancy),
//! 3. contract-reported errors ([BridgeError::Contract]), where the contract itself answered with a failing status,
//! 4. driver errors (unregistered driver, code that cannot be loaded by its runtime).
//!
//! Every error can be rendered as a [Response](crate::types::Response) so that callers always
//! get a structured result back.

use crate::context::ContextId;
use crate::types::{ContractType, Response, STATUS_ERROR};

/// Descriptive error definitions of contract execution.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The syscall referenced a context that is not (or no longer) alive.
    #[error("bad ctx id:{0}")]
    BadContextId(ContextId),

    #[error("bad contract name")]
    BadContractName,

    #[error("contract {0} already exists")]
    ContractExists(String),

    #[error("contract {0} not exists")]
    ContractNotExists(String),

    #[error("missing contract code")]
    MissingContractCode,

    #[error("missing args field in args")]
    MissingInitArgs,

    #[error("bad init args: {0}")]
    MalformedInitArgs(#[from] serde_json::Error),

    #[error("bad contract desc: {0}")]
    MalformedDescriptor(std::io::Error),

    #[error("unknown contract type:{0}")]
    UnknownContractType(String),

    #[error("contract type {0} not found")]
    CreatorNotFound(ContractType),

    #[error("module {0} not found")]
    ModuleNotFound(String),

    #[error("contract upgrade disabled")]
    UpgradeDisabled,

    /// `initialize` is reserved for the deploy path.
    #[error("invoke initialize method")]
    InitializeNotAllowed,

    #[error("contract output not found")]
    MissingOutput,

    #[error("recursive contract call not permitted")]
    RecursiveCall,

    #[error("max contract call depth exceeds")]
    MaxDepthExceeded,

    #[error("verify contract permission failed")]
    PermissionDenied,

    #[error("out of disk limit")]
    OutOfDiskLimit,

    #[error("out of cpu limit")]
    OutOfCpuLimit,

    /// The instance was aborted by the syscall service while running.
    #[error("instance aborted: {0}")]
    Aborted(String),

    #[error("put nil value")]
    PutNilValue,

    #[error("parse amount error")]
    ParseAmount,

    #[error("amount should not be negative")]
    NegativeAmount,

    #[error("empty to address")]
    EmptyToAddress,

    #[error("tx {0} not confirmed")]
    UnconfirmedTx(String),

    #[error("bad hex id: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("bad address")]
    BadAddress,

    #[error("driver {driver} for contract type {contract_type} already registered")]
    DriverExists {
        contract_type: ContractType,
        driver: String,
    },

    #[error("driver {driver} for contract type {contract_type} not found")]
    DriverNotFound {
        contract_type: ContractType,
        driver: String,
    },

    /// The runtime could not load, parse or compile the contract code.
    #[error("load contract code error: {0}")]
    CodeLoad(String),

    /// The runtime failed while executing the contract.
    #[error("contract runtime error: {0}")]
    Runtime(String),

    #[error("abi error: {0}")]
    Abi(String),

    /// The contract returned a status at or above the error threshold.
    #[error("contract error, status:{status}, message:{message}")]
    Contract { status: i32, message: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl BridgeError {
    /// whether the error is reported by the contract itself rather than by the system.
    pub fn is_contract_error(&self) -> bool {
        matches!(self, BridgeError::Contract { .. })
    }
}

impl<'a> From<&'a BridgeError> for Response {
    fn from(error: &'a BridgeError) -> Self {
        match error {
            BridgeError::Contract { status, message } => Response {
                status: *status,
                message: message.clone(),
                body: Vec::new(),
            },
            other => Response {
                status: STATUS_ERROR,
                message: other.to_string(),
                body: Vec::new(),
            },
        }
    }
}

/// Errors returned by the external model cache and chain collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("key not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}
