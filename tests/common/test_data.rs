use std::collections::HashMap;
use std::sync::Arc;

use borsh::BorshSerialize;
use parking_lot::Mutex;
use primitive_types::H160;
use xbridge_runtime::bridge::contract_manager::{
    ARG_CONTRACT_ABI, ARG_CONTRACT_CODE, ARG_CONTRACT_DESC, ARG_CONTRACT_NAME, ARG_INIT_ARGS,
};
use xbridge_runtime::contract::evm::address::evm_address_to_xchain;
use xbridge_runtime::model::ModelCacheRef;
use xbridge_runtime::types::ContractEvent;
use xbridge_runtime::{
    BridgeError, ContextConfig, ContractCodeDesc, DriverRegistry, Limits, Response, XBridge,
    XBridgeConfig,
};

use super::{native_codes, SimulateChain, SimulateModelCache, SimulateStore};

pub const TEST_LIMITS: Limits = Limits::new(10_000_000, 16 * 1024 * 1024, 1024 * 1024, 0);

/// base58 user address used as the initiator of every call.
pub fn initiator() -> String {
    evm_address_to_xchain(&H160::repeat_byte(0x11))
}

pub fn args(pairs: &[(&str, &[u8])]) -> HashMap<String, Vec<u8>> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_vec()))
        .collect()
}

/// Result of one invocation.
pub struct CallResult {
    pub result: Result<Response, BridgeError>,
    pub used: Limits,
    pub events: Vec<ContractEvent>,
    pub cache: Arc<Mutex<SimulateModelCache>>,
}

impl CallResult {
    pub fn body(&self) -> Vec<u8> {
        self.result.as_ref().unwrap().body.clone()
    }
}

pub struct TestEnv {
    pub store: Arc<SimulateStore>,
    pub chain: Arc<SimulateChain>,
    pub bridge: Arc<XBridge>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_chain(XBridgeConfig::default(), |_| {})
    }

    pub fn with_config(config: XBridgeConfig) -> Self {
        Self::with_chain(config, |_| {})
    }

    /// environment whose chain is prepared by `setup` before the bridge is opened.
    pub fn with_chain<F: FnOnce(&mut SimulateChain)>(config: XBridgeConfig, setup: F) -> Self {
        let store = SimulateStore::new();
        let mut chain = SimulateChain::new(store.clone());
        setup(&mut chain);
        let registry = DriverRegistry::with_builtin_drivers(native_codes()).unwrap();
        let bridge = XBridge::new(config, &registry, store.clone()).unwrap();
        Self {
            store,
            chain: Arc::new(chain),
            bridge,
        }
    }

    pub fn new_cache(&self) -> Arc<Mutex<SimulateModelCache>> {
        SimulateModelCache::new(self.store.clone())
    }

    pub fn context_config(
        &self,
        cache: &Arc<Mutex<SimulateModelCache>>,
        contract_name: &str,
        limits: Limits,
    ) -> ContextConfig {
        let cache: ModelCacheRef = cache.clone();
        ContextConfig {
            cache,
            core: self.chain.clone(),
            initiator: initiator(),
            auth_require: vec![],
            contract_name: contract_name.to_string(),
            resource_limits: limits,
            can_initialize: false,
            transfer_amount: String::new(),
            contract_set: None,
            contract_code_from_cache: false,
        }
    }

    /// deploys in a transaction of its own, committed only on success.
    pub fn deploy(
        &self,
        name: &str,
        contract_type: &str,
        code: &[u8],
        init_args: &[(&str, &str)],
        abi: Option<&str>,
    ) -> Result<(Response, Limits), BridgeError> {
        let cache = self.new_cache();
        let desc = ContractCodeDesc {
            contract_type: contract_type.to_string(),
            ..Default::default()
        };
        let init_args: HashMap<&str, &str> = init_args.iter().cloned().collect();
        let init_args = serde_json::to_vec(&init_args).unwrap();
        let desc = desc.try_to_vec().unwrap();
        let mut deploy_args = args(&[
            (ARG_CONTRACT_NAME, name.as_bytes()),
            (ARG_CONTRACT_CODE, code),
            (ARG_CONTRACT_DESC, &desc),
            (ARG_INIT_ARGS, &init_args),
        ]);
        if let Some(abi) = abi {
            deploy_args.insert(ARG_CONTRACT_ABI.to_string(), abi.as_bytes().to_vec());
        }

        let cfg = self.context_config(&cache, "", TEST_LIMITS);
        let result = self.bridge.deploy_contract(&cfg, &deploy_args);
        if result.is_ok() {
            self.store.commit(&cache.lock());
        }
        result
    }

    pub fn deploy_wasm(&self, name: &str, code: &[u8]) {
        self.deploy(name, "wasm", code, &[("owner", "alice")], None).unwrap();
    }

    pub fn deploy_native(&self, name: &str, code_name: &str) {
        self.deploy(name, "native", code_name.as_bytes(), &[], None).unwrap();
    }

    /// invokes `method` in a fresh transaction, committed on success.
    pub fn invoke(
        &self,
        module: &str,
        contract: &str,
        method: &str,
        call_args: HashMap<String, Vec<u8>>,
        limits: Limits,
    ) -> CallResult {
        let cache = self.new_cache();
        let cfg = self.context_config(&cache, contract, limits);
        let vm = self.bridge.get_virtual_machine(module).unwrap();
        let (result, used, events) = match vm.new_context(cfg) {
            Ok(mut vctx) => {
                let result = vctx.invoke(method, call_args);
                let used = vctx.resource_used();
                let events = vctx.events();
                vctx.release();
                (result, used, events)
            }
            Err(e) => (Err(e), Limits::default(), Vec::new()),
        };
        if result.is_ok() {
            self.store.commit(&cache.lock());
        }
        CallResult {
            result,
            used,
            events,
            cache,
        }
    }
}
