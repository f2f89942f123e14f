/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! CPU cost schedule of wasm contracts: the per-opcode cost fed to the metering middleware and the
//! fixed costs charged by host functions.

use wasmer::wasmparser::Operator;

/// cost of an opcode, in cpu units.
pub fn wasm_opcode_cost(operator: &Operator) -> u64 {
    match operator {
        Operator::I32Const { .. } | Operator::I64Const { .. } => 0,

        Operator::Nop
        | Operator::Unreachable
        | Operator::Block { .. }
        | Operator::Loop { .. }
        | Operator::If { .. }
        | Operator::Else
        | Operator::End => 0,
        Operator::Br { .. } | Operator::BrTable { .. } | Operator::Return | Operator::Drop => 2,
        Operator::Call { .. } | Operator::CallIndirect { .. } => 2,
        Operator::BrIf { .. } | Operator::Select => 3,

        Operator::LocalGet { .. }
        | Operator::LocalSet { .. }
        | Operator::LocalTee { .. }
        | Operator::GlobalGet { .. }
        | Operator::GlobalSet { .. } => 3,

        Operator::I32Load { .. }
        | Operator::I64Load { .. }
        | Operator::I32Load8S { .. }
        | Operator::I32Load8U { .. }
        | Operator::I32Load16S { .. }
        | Operator::I32Load16U { .. }
        | Operator::I64Load8S { .. }
        | Operator::I64Load8U { .. }
        | Operator::I64Load16S { .. }
        | Operator::I64Load16U { .. }
        | Operator::I64Load32S { .. }
        | Operator::I64Load32U { .. }
        | Operator::I32Store { .. }
        | Operator::I64Store { .. }
        | Operator::I32Store8 { .. }
        | Operator::I32Store16 { .. }
        | Operator::I64Store8 { .. }
        | Operator::I64Store16 { .. }
        | Operator::I64Store32 { .. } => 3,
        Operator::MemoryCopy { .. } | Operator::MemoryFill { .. } => 3,
        Operator::MemoryGrow { .. } => 100,

        Operator::I32Mul | Operator::I64Mul => 3,
        Operator::I32DivS
        | Operator::I32DivU
        | Operator::I32RemS
        | Operator::I32RemU
        | Operator::I64DivS
        | Operator::I64DivU
        | Operator::I64RemS
        | Operator::I64RemU => 80,

        _ => 1,
    }
}

/// charged on every host function call.
pub const HOST_CALL_BASE_COST: u64 = 10;

/// reading guest memory, per 8 bytes.
pub const MEMORY_READ_PER64_BITS_COST: u64 = 3;

/// writing guest memory, per 8 bytes.
pub const MEMORY_WRITE_PER64_BITS_COST: u64 = 3;

/// hashing, per input byte.
pub const CRYPTO_PER_BYTE_COST: u64 = 1;

pub const fn memory_read_cost(len: usize) -> u64 {
    ceil_div_8(len as u64).saturating_mul(MEMORY_READ_PER64_BITS_COST)
}

pub const fn memory_write_cost(len: usize) -> u64 {
    ceil_div_8(len as u64).saturating_mul(MEMORY_WRITE_PER64_BITS_COST)
}

const fn ceil_div_8(l: u64) -> u64 {
    l.saturating_add(7) / 8
}
