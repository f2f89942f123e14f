/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! XBridge Runtime is the **contract execution layer** of a chain node. It deploys, upgrades and
//! invokes smart contracts that run on one of three runtimes, while keeping every contract's view of
//! the chain behind a single syscall surface.
//!
//! ```text
//! deploy / upgrade / invoke
//!          |
//!       XBridge ---- DriverRegistry (wasmer | memory | rust-evm)
//!          |
//!   VirtualMachine -> Context + Instance --syscalls--> SyscallService -> ModelCache, ChainCore
//!                                                          |
//!                                                  nested contract_call
//! ```
//!
//! ### Example
//!
//! ```rust
//! // open the built-in drivers and the bridge over committed state (xmodel)
//! let registry = DriverRegistry::with_builtin_drivers(NativeCodeRegistry::new())?;
//! let bridge = XBridge::new(XBridgeConfig::default(), &registry, xmodel)?;
//!
//! // invoke a deployed contract within a transaction (cfg carries its model cache)
//! let vm = bridge.get_virtual_machine("wasm").unwrap();
//! let mut vctx = vm.new_context(cfg)?;
//! let response = vctx.invoke("increase", args)?;
//! let used = vctx.resource_used();
//! ```
//!
//! In summary, the [bridge] resolves a contract through a [code_provider], opens a [context] for the
//! call and asks the [registry] driver of the contract's runtime to build an instance ([contract]).
//! The instance runs within its resource [limits] and reaches the chain [model] through the
//! [syscall] service. Failures are reported as [error]s that always convert into a response.

pub mod bridge;
pub use bridge::{VirtualMachine, VmContext, XBridge};

pub mod code_provider;
pub use code_provider::{ContractCodeProvider, DescPinnedProvider, ModelCodeProvider};

pub mod config;
pub use config::{VmConfig, XBridgeConfig};

pub mod context;
pub use context::{Context, ContextConfig, ContextId, ContextManager};

pub mod contract;
pub use contract::native::{NativeCodeRegistry, NativeContext, NativeContract};

pub mod error;
pub use error::{BridgeError, ModelError};

pub mod hash;

pub mod limits;
pub use limits::{GasPrice, Limits};

pub mod model;

pub mod registry;
pub use registry::{DriverRegistry, InstanceCreatorConfig};

pub mod syscall;
pub use syscall::SyscallService;

pub mod types;
pub use types::{ContractCodeDesc, ContractType, Response};
