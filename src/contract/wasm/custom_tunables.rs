/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Store tunables enforcing the memory limit of a contract call.

use loupe::MemoryUsage;
use std::ptr::NonNull;
use std::sync::Arc;
use wasmer::{
    vm::{self, MemoryError, MemoryStyle, TableStyle, VMMemoryDefinition, VMTableDefinition},
    MemoryType, Pages, TableType, Tunables,
};

/// MemoryLimitTunables caps the linear memory of every instance created in its store at `limit`
/// pages. A memory declared without a maximum gets `limit` as its maximum; a memory whose declared
/// bounds exceed `limit` is refused. Everything else is delegated to `base`.
#[derive(MemoryUsage)]
pub struct MemoryLimitTunables<T: Tunables> {
    limit: Pages,
    base: T,
}

impl<T: Tunables> MemoryLimitTunables<T> {
    pub fn new(base: T, limit: Pages) -> Self {
        Self { limit, base }
    }

    fn bounded(&self, requested: &MemoryType) -> Result<MemoryType, MemoryError> {
        let mut ty = *requested;
        let maximum = *ty.maximum.get_or_insert(self.limit);
        if ty.minimum > self.limit || maximum > self.limit {
            return Err(MemoryError::Generic(format!(
                "memory of {} pages exceeds the limit of {} pages",
                maximum.0.max(ty.minimum.0),
                self.limit.0
            )));
        }
        Ok(ty)
    }
}

impl<T: Tunables> Tunables for MemoryLimitTunables<T> {
    fn memory_style(&self, memory: &MemoryType) -> MemoryStyle {
        let mut ty = *memory;
        ty.maximum.get_or_insert(self.limit);
        self.base.memory_style(&ty)
    }

    fn table_style(&self, table: &TableType) -> TableStyle {
        self.base.table_style(table)
    }

    fn create_host_memory(
        &self,
        ty: &MemoryType,
        style: &MemoryStyle,
    ) -> Result<Arc<dyn vm::Memory>, MemoryError> {
        let ty = self.bounded(ty)?;
        self.base.create_host_memory(&ty, style)
    }

    unsafe fn create_vm_memory(
        &self,
        ty: &MemoryType,
        style: &MemoryStyle,
        vm_definition_location: NonNull<VMMemoryDefinition>,
    ) -> Result<Arc<dyn vm::Memory>, MemoryError> {
        let ty = self.bounded(ty)?;
        self.base
            .create_vm_memory(&ty, style, vm_definition_location)
    }

    fn create_host_table(
        &self,
        ty: &TableType,
        style: &TableStyle,
    ) -> Result<Arc<dyn vm::Table>, String> {
        self.base.create_host_table(ty, style)
    }

    unsafe fn create_vm_table(
        &self,
        ty: &TableType,
        style: &TableStyle,
        vm_definition_location: NonNull<VMTableDefinition>,
    ) -> Result<Arc<dyn vm::Table>, String> {
        self.base.create_vm_table(ty, style, vm_definition_location)
    }
}
