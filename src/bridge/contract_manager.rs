/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! contract_manager implements deployment and upgrade of contracts on [XBridge].
//!
//! Both operations stage the contract descriptor and code into the model cache of the calling
//! transaction and then prove that the runtime can load the new code by building a throwaway
//! instance from the pending write set. Deploy additionally runs the `initialize` method.

use std::collections::HashMap;
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use super::XBridge;
use crate::code_provider::{
    contract_abi_key, contract_code_desc_key, contract_code_key, ContractCodeProvider,
    ModelCodeProvider, CONTRACT_BUCKET,
};
use crate::context::{ContextConfig, ContextRef};
use crate::contract::{ContractInstance, InstanceCreator};
use crate::error::BridgeError;
use crate::hash::double_sha256;
use crate::limits::Limits;
use crate::model::{model_cache_disk_used, CacheReader, ModelCacheRef};
use crate::types::{ContractCodeDesc, ContractType, Response, INITIALIZE_METHOD};

/// Keys of the argument map of deploy and upgrade.
pub const ARG_CONTRACT_NAME: &str = "contract_name";
pub const ARG_CONTRACT_CODE: &str = "contract_code";
pub const ARG_CONTRACT_DESC: &str = "contract_desc";
pub const ARG_CONTRACT_ABI: &str = "contract_abi";
pub const ARG_INIT_ARGS: &str = "init_args";

impl XBridge {
    /// deploys a contract and runs its `initialize` method.
    ///
    /// `args` carries the contract name, the code, the borsh encoded descriptor (empty for the
    /// default wasm descriptor), the `initialize` arguments as a JSON object of strings, and the ABI
    /// of evm contracts. Returns the response of `initialize` and the resources it used.
    pub fn deploy_contract(
        &self,
        cfg: &ContextConfig,
        args: &HashMap<String, Vec<u8>>,
    ) -> Result<(Response, Limits), BridgeError> {
        let name = contract_name_arg(args)?;
        if self.code_provider.get_contract_code_desc(&name).is_ok() {
            return Err(BridgeError::ContractExists(name));
        }
        let code = args
            .get(ARG_CONTRACT_CODE)
            .ok_or(BridgeError::MissingContractCode)?;
        let init_args = args.get(ARG_INIT_ARGS).ok_or(BridgeError::MissingInitArgs)?;
        let init_args: HashMap<String, String> = serde_json::from_slice(init_args)?;
        let init_args = init_args
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();

        let mut desc = match args.get(ARG_CONTRACT_DESC) {
            Some(buf) if !buf.is_empty() => {
                ContractCodeDesc::try_from_slice(buf).map_err(BridgeError::MalformedDescriptor)?
            }
            _ => ContractCodeDesc::default(),
        };
        desc.digest = double_sha256(code).to_vec();
        let contract_type = desc.contract_type()?;
        let creator = self.creator(contract_type)?.clone();

        {
            let mut cache = cfg.cache.lock();
            cache.put(CONTRACT_BUCKET, &contract_code_desc_key(&name), &encode_desc(&desc)?)?;
            cache.put(CONTRACT_BUCKET, &contract_code_key(&name), code)?;
            if contract_type == ContractType::Evm {
                if let Some(abi) = args.get(ARG_CONTRACT_ABI) {
                    cache.put(CONTRACT_BUCKET, &contract_abi_key(&name), abi)?;
                }
            }
        }

        let trial_cfg = ContextConfig {
            contract_name: name.clone(),
            contract_set: None,
            ..cfg.clone()
        };
        if let Err(e) = self.trial_instance(&creator, &trial_cfg) {
            creator.remove_cache(&name);
            tracing::error!(contract = %name, error = %e, "create contract instance error when deploy contract");
            return Err(e);
        }

        let init_cfg = ContextConfig {
            contract_name: name.clone(),
            can_initialize: true,
            contract_code_from_cache: true,
            ..cfg.clone()
        };
        match self.init_contract(contract_type, init_cfg, init_args) {
            Ok(result) => Ok(result),
            Err(e) => {
                if !e.is_contract_error() {
                    creator.remove_cache(&name);
                }
                tracing::error!(contract = %name, error = %e, "call contract initialize method error");
                Err(e)
            }
        }
    }

    /// replaces the code of a deployed contract. The state of the contract is kept and `initialize`
    /// is not run again.
    pub fn upgrade_contract(
        &self,
        cfg: &ContextConfig,
        args: &HashMap<String, Vec<u8>>,
    ) -> Result<(Response, Limits), BridgeError> {
        if !self.config.enable_upgrade {
            return Err(BridgeError::UpgradeDisabled);
        }
        let name = contract_name_arg(args)?;
        let mut desc = self
            .code_provider
            .get_contract_code_desc(&name)
            .map_err(|_| BridgeError::ContractNotExists(name.clone()))?;
        let code = args
            .get(ARG_CONTRACT_CODE)
            .ok_or(BridgeError::MissingContractCode)?;
        desc.digest = double_sha256(code).to_vec();
        let contract_type = desc.contract_type()?;
        let creator = self.creator(contract_type)?.clone();

        {
            let mut cache = cfg.cache.lock();
            cache.put(CONTRACT_BUCKET, &contract_code_desc_key(&name), &encode_desc(&desc)?)?;
            cache.put(CONTRACT_BUCKET, &contract_code_key(&name), code)?;
        }

        let trial_cfg = ContextConfig {
            contract_name: name.clone(),
            resource_limits: Limits::MAX,
            contract_set: None,
            ..cfg.clone()
        };
        if let Err(e) = self.trial_instance(&creator, &trial_cfg) {
            tracing::error!(contract = %name, error = %e, "create contract instance error when upgrade contract");
            return Err(e);
        }

        let disk = model_cache_disk_used(&*cfg.cache.lock());
        let response = Response::ok("upgrade success");
        Ok((
            response,
            Limits {
                disk,
                ..Limits::default()
            },
        ))
    }

    fn init_contract(
        &self,
        contract_type: ContractType,
        cfg: ContextConfig,
        args: HashMap<String, Vec<u8>>,
    ) -> Result<(Response, Limits), BridgeError> {
        let vm = self
            .get_virtual_machine(contract_type.as_str())
            .ok_or(BridgeError::CreatorNotFound(contract_type))?;
        let mut vctx = vm.new_context(cfg)?;
        let response = vctx.invoke(INITIALIZE_METHOD, args)?;
        let used = vctx.resource_used();
        vctx.release();
        Ok((response, used))
    }

    // Builds an instance from the pending write set and throws it away.
    fn trial_instance(
        &self,
        creator: &Arc<dyn InstanceCreator>,
        cfg: &ContextConfig,
    ) -> Result<(), BridgeError> {
        let ctx: ContextRef = self.ctxmgr.make_context(cfg);
        let id = ctx.lock().id;
        ctx.lock().method = INITIALIZE_METHOD.to_string();

        let cp: Box<dyn ContractCodeProvider> = Box::new(pending_code_provider(&cfg.cache));
        let result = creator.create_instance(&ctx, cp).map(|mut instance| {
            instance.release();
        });
        self.ctxmgr.destroy_context(id);
        result
    }
}

fn contract_name_arg(args: &HashMap<String, Vec<u8>>) -> Result<String, BridgeError> {
    args.get(ARG_CONTRACT_NAME)
        .and_then(|name| String::from_utf8(name.clone()).ok())
        .filter(|name| !name.is_empty())
        .ok_or(BridgeError::BadContractName)
}

fn encode_desc(desc: &ContractCodeDesc) -> Result<Vec<u8>, BridgeError> {
    desc.try_to_vec().map_err(BridgeError::MalformedDescriptor)
}

fn pending_code_provider(cache: &ModelCacheRef) -> ModelCodeProvider {
    ModelCodeProvider::new(Arc::new(CacheReader(cache.clone())))
}
