/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Construction of the wasmer [Store] used to compile and run contracts: singlepass compiler with the
//! [NonDeterminismFilter] and the metering middleware, and an optional memory cap.

use std::convert::TryFrom;
use std::sync::Arc;
use wasmer::{BaseTunables, CompilerConfig, Pages, Store, Target, WASM_PAGE_SIZE};
use wasmer_compiler_singlepass::Singlepass;
use wasmer_engine_universal::Universal;
use wasmer_middlewares::Metering;

use super::cost::wasm_opcode_cost;
use super::custom_tunables::MemoryLimitTunables;
use super::non_determinism_filter::NonDeterminismFilter;

/// Builds a store. Metering starts at `cpu_limit` points; instances reset it with
/// `set_remaining_points` once created. `memory_limit` is in bytes.
pub fn instantiate_store(cpu_limit: u64, memory_limit: Option<usize>) -> Store {
    let nd_filter = Arc::new(NonDeterminismFilter::default());
    let metering = Arc::new(Metering::new(cpu_limit, wasm_opcode_cost));

    let mut compiler_config = Singlepass::new();
    compiler_config.push_middleware(nd_filter);
    compiler_config.push_middleware(metering);
    let engine = Universal::new(compiler_config).engine();

    match memory_limit {
        Some(limit) => {
            let base = BaseTunables::for_target(&Target::default());
            Store::new_with_tunables(&engine, MemoryLimitTunables::new(base, limit_pages(limit)))
        }
        None => Store::new(&engine),
    }
}

/// converts a byte limit to wasm pages, capped at the 65536 pages a 32 bit memory can hold.
fn limit_pages(limit: usize) -> Pages {
    const MAX_PAGES: u32 = 65536;

    let pages = u32::try_from(limit / WASM_PAGE_SIZE)
        .unwrap_or(MAX_PAGES)
        .min(MAX_PAGES);
    Pages(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_limit_to_pages() {
        assert_eq!(limit_pages(0), Pages(0));
        assert_eq!(limit_pages(WASM_PAGE_SIZE - 1), Pages(0));
        assert_eq!(limit_pages(3 * WASM_PAGE_SIZE), Pages(3));
        assert_eq!(limit_pages(usize::MAX), Pages(65536));
    }
}
