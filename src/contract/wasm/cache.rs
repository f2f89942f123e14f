/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cache of compiled contracts.
//!
//! Compiled modules are kept serialized in memory per contract name, tagged with the digest of the
//! code they were compiled from, so a new instance only pays for deserialization. When a directory
//! is given, modules are also persisted there with a [FileSystemCache] keyed by digest, which
//! survives restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use wasmer_cache::{Cache as WasmerCache, FileSystemCache, Hash};

use super::module;
use super::store::instantiate_store;
use crate::code_provider::ContractCodeProvider;
use crate::error::BridgeError;

/// Serialized artifact of a compiled module.
pub type Artifact = Arc<Vec<u8>>;

struct CachedCode {
    digest: Vec<u8>,
    artifact: Artifact,
}

pub struct CodeCache {
    entries: Mutex<HashMap<String, CachedCode>>,
    disk: Option<Mutex<FileSystemCache>>,
}

impl CodeCache {
    /// cache kept in memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            disk: None,
        }
    }

    /// cache backed by `dir`.
    pub fn with_disk<P: Into<PathBuf>>(dir: P) -> Result<Self, BridgeError> {
        let fs_cache = FileSystemCache::new(dir.into())
            .map_err(|e| BridgeError::CodeLoad(format!("open code cache: {e}")))?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            disk: Some(Mutex::new(fs_cache)),
        })
    }

    /// returns the compiled artifact of `name` at `digest`, compiling the code from `cp` if neither
    /// the memory nor the disk cache holds it.
    pub fn get_or_compile(
        &self,
        name: &str,
        digest: &[u8],
        cp: &dyn ContractCodeProvider,
    ) -> Result<Artifact, BridgeError> {
        if let Some(cached) = self.entries.lock().get(name) {
            if cached.digest == digest {
                return Ok(cached.artifact.clone());
            }
        }

        let store = instantiate_store(u64::MAX, None);
        let key = disk_key(digest);
        let module = match self.load_from_disk(key, &store) {
            Some(module) => module,
            None => {
                let code = cp.get_contract_code(name)?;
                let module = module::compile(&code, &store)?;
                self.store_to_disk(key, &module);
                tracing::debug!(contract = %name, "contract compiled");
                module
            }
        };
        let artifact = Arc::new(
            module
                .serialize()
                .map_err(|e| BridgeError::CodeLoad(e.to_string()))?,
        );

        self.entries.lock().insert(
            name.to_string(),
            CachedCode {
                digest: digest.to_vec(),
                artifact: artifact.clone(),
            },
        );
        Ok(artifact)
    }

    /// forgets the compiled code of `name`. Disk entries are keyed by digest and stay.
    pub fn remove(&self, name: &str) {
        self.entries.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    fn load_from_disk(&self, key: Option<Hash>, store: &wasmer::Store) -> Option<wasmer::Module> {
        let (disk, key) = (self.disk.as_ref()?, key?);
        // Safety: the directory only holds modules serialized by this cache.
        unsafe { disk.lock().load(store, key) }.ok()
    }

    fn store_to_disk(&self, key: Option<Hash>, module: &wasmer::Module) {
        if let (Some(disk), Some(key)) = (self.disk.as_ref(), key) {
            if let Err(e) = disk.lock().store(key, module) {
                tracing::warn!(error = %e, "fail to persist compiled contract");
            }
        }
    }
}

fn disk_key(digest: &[u8]) -> Option<Hash> {
    let bytes: [u8; 32] = digest.try_into().ok()?;
    Some(Hash::new(bytes))
}
