/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! code_provider resolves a contract name to its descriptor, code and ABI.
//!
//! [ModelCodeProvider] reads from a key value store (committed state, or the pending write set via
//! [CacheReader](crate::model::CacheReader)). [DescPinnedProvider] wraps another provider and
//! always answers the descriptor it was built with, which is needed while deploying: the descriptor
//! only exists in the pending write set at that time.

use std::sync::Arc;

use borsh::BorshDeserialize;

use crate::error::{BridgeError, ModelError};
use crate::model::StateReader;
use crate::types::ContractCodeDesc;

/// Bucket holding contract descriptors, code and ABI.
pub const CONTRACT_BUCKET: &str = "contract";

pub fn contract_code_desc_key(contract_name: &str) -> Vec<u8> {
    format!("{contract_name}.desc").into_bytes()
}

pub fn contract_code_key(contract_name: &str) -> Vec<u8> {
    format!("{contract_name}.code").into_bytes()
}

pub fn contract_abi_key(contract_name: &str) -> Vec<u8> {
    format!("{contract_name}.abi").into_bytes()
}

pub trait ContractCodeProvider: Send + Sync {
    fn get_contract_code_desc(&self, name: &str) -> Result<ContractCodeDesc, BridgeError>;

    fn get_contract_code(&self, name: &str) -> Result<Vec<u8>, BridgeError>;

    /// only meaningful for evm contracts.
    fn get_contract_abi(&self, name: &str) -> Result<Vec<u8>, BridgeError>;
}

/// ModelCodeProvider reads contract data from a [StateReader].
#[derive(Clone)]
pub struct ModelCodeProvider {
    reader: Arc<dyn StateReader>,
}

impl ModelCodeProvider {
    pub fn new(reader: Arc<dyn StateReader>) -> Self {
        Self { reader }
    }

    // An empty value is reported as not found, same as an absent key.
    fn get_non_empty(&self, name: &str, key: &[u8]) -> Result<Vec<u8>, BridgeError> {
        match self.reader.get(CONTRACT_BUCKET, key) {
            Ok(data) if !data.value.is_empty() => Ok(data.value),
            Ok(_) | Err(ModelError::NotFound) => Err(BridgeError::ContractNotExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

impl ContractCodeProvider for ModelCodeProvider {
    fn get_contract_code_desc(&self, name: &str) -> Result<ContractCodeDesc, BridgeError> {
        let bytes = self.get_non_empty(name, &contract_code_desc_key(name))?;
        ContractCodeDesc::try_from_slice(&bytes).map_err(BridgeError::MalformedDescriptor)
    }

    fn get_contract_code(&self, name: &str) -> Result<Vec<u8>, BridgeError> {
        self.get_non_empty(name, &contract_code_key(name))
    }

    fn get_contract_abi(&self, name: &str) -> Result<Vec<u8>, BridgeError> {
        self.get_non_empty(name, &contract_abi_key(name))
    }
}

/// DescPinnedProvider forwards code and ABI lookups to `inner` and answers the descriptor with `desc`.
pub struct DescPinnedProvider {
    inner: Box<dyn ContractCodeProvider>,
    desc: ContractCodeDesc,
}

impl DescPinnedProvider {
    pub fn new(inner: Box<dyn ContractCodeProvider>, desc: ContractCodeDesc) -> Self {
        Self { inner, desc }
    }
}

impl ContractCodeProvider for DescPinnedProvider {
    fn get_contract_code_desc(&self, _name: &str) -> Result<ContractCodeDesc, BridgeError> {
        Ok(self.desc.clone())
    }

    fn get_contract_code(&self, name: &str) -> Result<Vec<u8>, BridgeError> {
        self.inner.get_contract_code(name)
    }

    fn get_contract_abi(&self, name: &str) -> Result<Vec<u8>, BridgeError> {
        self.inner.get_contract_abi(name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use borsh::BorshSerialize;

    use super::*;
    use crate::model::VersionedData;

    #[derive(Default)]
    struct MapReader(HashMap<Vec<u8>, Vec<u8>>);

    impl StateReader for MapReader {
        fn get(&self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError> {
            assert_eq!(bucket, CONTRACT_BUCKET);
            self.0
                .get(key)
                .map(|value| VersionedData {
                    bucket: bucket.to_string(),
                    key: key.to_vec(),
                    value: value.clone(),
                    ..Default::default()
                })
                .ok_or(ModelError::NotFound)
        }
    }

    fn desc(contract_type: &str) -> ContractCodeDesc {
        ContractCodeDesc {
            contract_type: contract_type.to_string(),
            digest: vec![1, 2, 3],
            ..Default::default()
        }
    }

    #[test]
    fn reads_descriptor_and_code() {
        let mut reader = MapReader::default();
        reader
            .0
            .insert(contract_code_desc_key("counter"), desc("native").try_to_vec().unwrap());
        reader.0.insert(contract_code_key("counter"), b"code".to_vec());
        let cp = ModelCodeProvider::new(Arc::new(reader));

        assert_eq!(cp.get_contract_code_desc("counter").unwrap(), desc("native"));
        assert_eq!(cp.get_contract_code("counter").unwrap(), b"code".to_vec());
        assert!(matches!(
            cp.get_contract_abi("counter"),
            Err(BridgeError::ContractNotExists(_))
        ));
    }

    // Empty stored values are indistinguishable from missing keys.
    #[test]
    fn empty_value_is_not_found() {
        let mut reader = MapReader::default();
        reader.0.insert(contract_code_desc_key("counter"), vec![]);
        reader.0.insert(contract_code_key("counter"), vec![]);
        let cp = ModelCodeProvider::new(Arc::new(reader));

        assert!(matches!(
            cp.get_contract_code_desc("counter"),
            Err(BridgeError::ContractNotExists(_))
        ));
        assert!(matches!(
            cp.get_contract_code("counter"),
            Err(BridgeError::ContractNotExists(_))
        ));
    }

    #[test]
    fn pinned_descriptor_overrides_inner() {
        let mut reader = MapReader::default();
        reader
            .0
            .insert(contract_code_desc_key("counter"), desc("wasm").try_to_vec().unwrap());
        reader.0.insert(contract_code_key("counter"), b"code".to_vec());
        let inner = Box::new(ModelCodeProvider::new(Arc::new(reader)));
        let cp = DescPinnedProvider::new(inner, desc("evm"));

        assert_eq!(cp.get_contract_code_desc("counter").unwrap(), desc("evm"));
        assert_eq!(cp.get_contract_code_desc("missing").unwrap(), desc("evm"));
        assert_eq!(cp.get_contract_code("counter").unwrap(), b"code".to_vec());
    }
}
