/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! context defines the per-call execution state ([Context]) and the [ContextManager] that owns it.
//!
//! Contexts live in an arena. A [ContextId] carries the slot index and the generation of the slot,
//! so an id of a destroyed context never resolves to a newer context placed in the same slot.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::contract::InstanceHandle;
use crate::limits::Limits;
use crate::model::{model_cache_disk_used, ChainCore, ModelCacheRef};
use crate::types::{ContractEvent, Response};

/// ContractSet is the set of contract names on the current call stack. It is shared by the whole call tree.
pub type ContractSet = Arc<Mutex<HashSet<String>>>;

pub type ContextRef = Arc<Mutex<Context>>;

/// ContextId identifies a live [Context]. The u64 form is what crosses into contract code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    index: u32,
    generation: u32,
}

impl ContextId {
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_u64(id: u64) -> Self {
        Self {
            index: id as u32,
            generation: (id >> 32) as u32,
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

/// ContextConfig is supplied by the caller of [VirtualMachine::new_context](crate::bridge::VirtualMachine::new_context).
#[derive(Clone)]
pub struct ContextConfig {
    pub cache: ModelCacheRef,
    pub core: Arc<dyn ChainCore>,
    pub initiator: String,
    pub auth_require: Vec<String>,
    pub contract_name: String,
    pub resource_limits: Limits,
    /// only the deploy path may call `initialize`
    pub can_initialize: bool,
    pub transfer_amount: String,
    /// recursion set of the enclosing call tree, `None` for a top level call
    pub contract_set: Option<ContractSet>,
    /// read contract code from the pending write set instead of committed state
    pub contract_code_from_cache: bool,
}

/// Context is the state of one contract call, shared between its instance and the syscall service.
pub struct Context {
    pub id: ContextId,
    pub contract_name: String,
    pub method: String,
    pub args: HashMap<String, Vec<u8>>,
    pub initiator: String,
    pub auth_require: Vec<String>,
    pub transfer_amount: String,
    pub resource_limits: Limits,
    /// usage of the finished sub calls, disk excluded
    pub sub_resource_used: Limits,
    pub can_initialize: bool,
    pub contract_set: ContractSet,
    pub cache: ModelCacheRef,
    pub core: Arc<dyn ChainCore>,
    pub output: Option<Response>,
    pub events: Vec<ContractEvent>,
    /// handle to the instance running in this context
    pub instance: Option<Arc<InstanceHandle>>,
}

impl Context {
    /// disk used by the whole call tree.
    pub fn disk_used(&self) -> i64 {
        model_cache_disk_used(&*self.cache.lock())
    }

    pub fn exceed_disk_limit(&self) -> bool {
        self.disk_used() > self.resource_limits.disk
    }

    /// usage of the running instance plus the finished sub calls, with the tree wide disk usage.
    pub fn resource_used(&self) -> Limits {
        let mut total = self
            .instance
            .as_ref()
            .map(|instance| instance.usage())
            .unwrap_or_default();
        total.add(self.sub_resource_used);
        total.disk = self.disk_used();
        total
    }

    /// fold the usage of a finished sub call. Disk is tree wide and therefore not folded.
    pub fn add_sub_resource_used(&mut self, used: Limits) {
        self.sub_resource_used.add(Limits { disk: 0, ..used });
    }
}

struct Slot {
    generation: u32,
    context: Option<ContextRef>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// ContextManager owns every live [Context].
#[derive(Default)]
pub struct ContextManager {
    arena: Mutex<Arena>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// make_context allocates and registers a new context built from `cfg`. A missing recursion set
    /// is replaced by a new one seeded with the contract itself.
    pub fn make_context(&self, cfg: &ContextConfig) -> ContextRef {
        let contract_set = cfg.contract_set.clone().unwrap_or_else(|| {
            Arc::new(Mutex::new(HashSet::from([cfg.contract_name.clone()])))
        });

        let mut arena = self.arena.lock();
        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot {
                    generation: 0,
                    context: None,
                });
                (arena.slots.len() - 1) as u32
            }
        };
        let slot = &mut arena.slots[index as usize];
        let id = ContextId {
            index,
            generation: slot.generation,
        };

        let context = Arc::new(Mutex::new(Context {
            id,
            contract_name: cfg.contract_name.clone(),
            method: String::new(),
            args: HashMap::new(),
            initiator: cfg.initiator.clone(),
            auth_require: cfg.auth_require.clone(),
            transfer_amount: cfg.transfer_amount.clone(),
            resource_limits: cfg.resource_limits,
            sub_resource_used: Limits::default(),
            can_initialize: cfg.can_initialize,
            contract_set,
            cache: cfg.cache.clone(),
            core: cfg.core.clone(),
            output: None,
            events: Vec::new(),
            instance: None,
        }));
        slot.context = Some(context.clone());
        drop(arena);

        tracing::debug!(ctx_id = %id, contract = %cfg.contract_name, "context created");
        context
    }

    /// looks up a live context.
    pub fn context(&self, id: ContextId) -> Option<ContextRef> {
        let arena = self.arena.lock();
        arena
            .slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.context.clone())
    }

    /// removes the context. Returns false if it was already destroyed.
    pub fn destroy_context(&self, id: ContextId) -> bool {
        let mut arena = self.arena.lock();
        let slot = match arena.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.context.is_some() => slot,
            _ => return false,
        };
        slot.context = None;
        slot.generation = slot.generation.wrapping_add(1);
        arena.free.push(id.index);
        drop(arena);

        tracing::debug!(ctx_id = %id, "context destroyed");
        true
    }

    /// number of live contexts.
    pub fn len(&self) -> usize {
        let arena = self.arena.lock();
        arena.slots.len() - arena.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
