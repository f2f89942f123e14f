/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reading and writing byte arrays in the linear memory of a contract.

use anyhow::{anyhow, Result};
use wasmer::{Array, Memory, NativeFunc, WasmPtr};

/// MemoryContext gives host functions access to the guest memory and to its exported `alloc`.
pub trait MemoryContext {
    fn get_memory(&self) -> Result<&Memory>;
    fn get_alloc(&self) -> Result<&NativeFunc<u32, WasmPtr<u8, Array>>>;

    /// copies `value` into a segment allocated by the guest, stores the segment offset at
    /// `val_ptr_ptr` and returns the length of `value`.
    fn write_bytes_to_memory(&self, value: &[u8], val_ptr_ptr: u32) -> Result<u32> {
        let memory = self.get_memory()?;
        let len = u32::try_from(value.len()).map_err(|_| anyhow!("value too large"))?;

        let segment_ptr = self
            .get_alloc()?
            .call(len)
            .map_err(|e| anyhow!("fail to allocate linear memory: {}", e))?;
        if len > 0 {
            let segment = segment_ptr
                .deref(memory, 0, len)
                .ok_or_else(|| anyhow!("fail to dereference linear memory"))?;
            for (cell, byte) in segment.iter().zip(value) {
                cell.set(*byte);
            }
        }

        let ptr_ptr: WasmPtr<u32, Array> = WasmPtr::new(val_ptr_ptr);
        let ptr_cell = ptr_ptr
            .deref(memory, 0, 1)
            .ok_or_else(|| anyhow!("fail to dereference return pointer"))?;
        ptr_cell[0].set(segment_ptr.offset());

        Ok(len)
    }

    fn read_bytes_from_memory(&self, offset: u32, len: u32) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let memory = self.get_memory()?;
        let bytes_ptr: WasmPtr<u8, Array> = WasmPtr::new(offset);
        let cells = bytes_ptr
            .deref(memory, 0, len)
            .ok_or_else(|| anyhow!("fail to read bytes from linear memory"))?;
        Ok(cells.iter().map(|cell| cell.get()).collect())
    }
}
