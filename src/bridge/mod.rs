/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! bridge defines [XBridge], the façade of the contract execution layer.
//!
//! XBridge opens one [InstanceCreator] per enabled runtime and exposes a [VirtualMachine] per runtime.
//! A call goes through [VirtualMachine::new_context], which resolves the contract descriptor, builds
//! a [Context](crate::context::Context) and its [Instance], and returns a [VmContext] to invoke.
//! Deploy and upgrade are implemented in [contract_manager].

pub mod contract_manager;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::code_provider::{ContractCodeProvider, DescPinnedProvider, ModelCodeProvider};
use crate::config::XBridgeConfig;
use crate::context::{ContextConfig, ContextId, ContextManager, ContextRef};
use crate::contract::{ContractInstance, Instance, InstanceCreator};
use crate::error::BridgeError;
use crate::limits::Limits;
use crate::model::{CacheReader, StateReader};
use crate::registry::{DriverRegistry, InstanceCreatorConfig};
use crate::syscall::{SyscallService, VmManager};
use crate::types::{ContractEvent, ContractType, Response, INITIALIZE_METHOD};

pub type Creators = HashMap<ContractType, Arc<dyn InstanceCreator>>;

/// VirtualMachine is the entry of contract calls for one runtime.
pub trait VirtualMachine: Send + Sync {
    fn name(&self) -> &str;

    fn new_context(&self, cfg: ContextConfig) -> Result<VmContext, BridgeError>;
}

pub struct XBridge {
    ctxmgr: Arc<ContextManager>,
    syscall: Arc<SyscallService>,
    config: XBridgeConfig,
    creators: Arc<Creators>,
    vms: HashMap<String, Arc<VmImpl>>,
    code_provider: ModelCodeProvider,
}

impl XBridge {
    /// opens the drivers configured in `config` from `registry`. `xmodel` is the committed state
    /// contract descriptors and code are read from.
    pub fn new(
        config: XBridgeConfig,
        registry: &DriverRegistry,
        xmodel: Arc<dyn StateReader>,
    ) -> Result<Arc<XBridge>, BridgeError> {
        let ctxmgr = Arc::new(ContextManager::new());
        let syscall = Arc::new(SyscallService::new(ctxmgr.clone(), config.enable_debug_log));

        let mut creators = Creators::new();
        for contract_type in ContractType::ALL {
            let vm_config = match config.vm_configs.get(&contract_type) {
                Some(vm_config) => vm_config,
                None => {
                    tracing::info!(%contract_type, "config for contract type not found");
                    continue;
                }
            };
            if !vm_config.enable {
                tracing::info!(%contract_type, "contract type disabled");
                continue;
            }
            let creator_config = InstanceCreatorConfig {
                basedir: config.basedir.join(&vm_config.driver),
                syscall: syscall.clone(),
                vm_config: vm_config.clone(),
            };
            let creator = registry.open(contract_type, &vm_config.driver, &creator_config)?;
            creators.insert(contract_type, creator);
        }
        let creators = Arc::new(creators);

        let code_provider = ModelCodeProvider::new(xmodel);
        let vms = creators
            .keys()
            .map(|contract_type| {
                let vm = VmImpl {
                    name: contract_type.as_str().to_string(),
                    ctxmgr: ctxmgr.clone(),
                    creators: creators.clone(),
                    code_provider: code_provider.clone(),
                };
                (vm.name.clone(), Arc::new(vm))
            })
            .collect();

        let bridge = Arc::new(XBridge {
            ctxmgr,
            syscall: syscall.clone(),
            config,
            creators,
            vms,
            code_provider,
        });
        let vmm: Weak<dyn VmManager> = Arc::downgrade(&bridge) as Weak<dyn VmManager>;
        syscall.bind_vm_manager(vmm);
        Ok(bridge)
    }

    pub fn get_virtual_machine(&self, name: &str) -> Option<Arc<dyn VirtualMachine>> {
        self.vms
            .get(name)
            .map(|vm| vm.clone() as Arc<dyn VirtualMachine>)
    }

    /// hands every virtual machine to `regfn`, stopping at the first error.
    pub fn register_to_core<F, E>(&self, mut regfn: F) -> Result<(), E>
    where
        F: FnMut(&str, Arc<dyn VirtualMachine>) -> Result<(), E>,
    {
        for (name, vm) in &self.vms {
            regfn(name, vm.clone() as Arc<dyn VirtualMachine>)?;
        }
        Ok(())
    }

    pub fn syscall_service(&self) -> &Arc<SyscallService> {
        &self.syscall
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.ctxmgr
    }

    fn creator(&self, contract_type: ContractType) -> Result<&Arc<dyn InstanceCreator>, BridgeError> {
        self.creators
            .get(&contract_type)
            .ok_or(BridgeError::CreatorNotFound(contract_type))
    }
}

impl VmManager for XBridge {
    fn get_virtual_machine(&self, name: &str) -> Option<Arc<dyn VirtualMachine>> {
        XBridge::get_virtual_machine(self, name)
    }
}

struct VmImpl {
    name: String,
    ctxmgr: Arc<ContextManager>,
    creators: Arc<Creators>,
    code_provider: ModelCodeProvider,
}

impl VirtualMachine for VmImpl {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_context(&self, cfg: ContextConfig) -> Result<VmContext, BridgeError> {
        let cp: Box<dyn ContractCodeProvider> = if cfg.contract_code_from_cache {
            Box::new(ModelCodeProvider::new(Arc::new(CacheReader(cfg.cache.clone()))))
        } else {
            Box::new(self.code_provider.clone())
        };
        let desc = cp.get_contract_code_desc(&cfg.contract_name)?;
        let contract_type = desc.contract_type()?;
        let creator = self
            .creators
            .get(&contract_type)
            .ok_or(BridgeError::CreatorNotFound(contract_type))?;

        let ctx = self.ctxmgr.make_context(&cfg);
        let id = ctx.lock().id;
        let cp = Box::new(DescPinnedProvider::new(cp, desc));
        let instance = match creator.create_instance(&ctx, cp) {
            Ok(instance) => instance,
            Err(e) => {
                self.ctxmgr.destroy_context(id);
                return Err(e);
            }
        };
        ctx.lock().instance = Some(instance.handle().clone());

        Ok(VmContext {
            ctxmgr: self.ctxmgr.clone(),
            ctx,
            id,
            instance,
            released: false,
        })
    }
}

/// VmContext is the handle of one contract call. Dropping it releases the instance and destroys
/// the context.
pub struct VmContext {
    ctxmgr: Arc<ContextManager>,
    ctx: ContextRef,
    id: ContextId,
    instance: Instance,
    released: bool,
}

impl VmContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// runs `method`. A response with an error status is returned as [BridgeError::Contract].
    pub fn invoke(
        &mut self,
        method: &str,
        args: HashMap<String, Vec<u8>>,
    ) -> Result<Response, BridgeError> {
        {
            let mut ctx = self.ctx.lock();
            if !ctx.can_initialize && method == INITIALIZE_METHOD {
                return Err(BridgeError::InitializeNotAllowed);
            }
            ctx.method = method.to_string();
            ctx.args = args;
            ctx.output = None;
        }

        self.instance.exec()?;

        let output = self
            .ctx
            .lock()
            .output
            .clone()
            .ok_or(BridgeError::MissingOutput)?;
        if output.is_error() {
            return Err(BridgeError::Contract {
                status: output.status,
                message: output.message,
            });
        }
        Ok(output)
    }

    /// usage of the call and its sub calls, with the tree wide disk usage.
    pub fn resource_used(&self) -> Limits {
        self.ctx.lock().resource_used()
    }

    pub fn events(&self) -> Vec<ContractEvent> {
        self.ctx.lock().events.clone()
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.instance.release();
        self.ctx.lock().instance = None;
        self.ctxmgr.destroy_context(self.id);
    }
}

impl Drop for VmContext {
    fn drop(&mut self) {
        self.release();
    }
}
