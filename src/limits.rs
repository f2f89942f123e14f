/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! limits defines the four dimensional resource vector used both as a budget (limits) and as
//! a measurement (usage) of contract execution, and its conversion to gas.

use serde::{Deserialize, Serialize};

/// Limits describes CPU, memory, disk and fee. The same type carries the limits granted to a call
/// and the resources a call has used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub cpu: i64,
    pub memory: i64,
    pub disk: i64,
    pub fee: i64,
}

impl Limits {
    /// MAX is the unlimited value used by system level calls (e.g. validating code in upgrade).
    pub const MAX: Limits = Limits {
        cpu: i64::MAX,
        memory: i64::MAX,
        disk: i64::MAX,
        fee: i64::MAX,
    };

    pub const fn new(cpu: i64, memory: i64, disk: i64, fee: i64) -> Self {
        Self {
            cpu,
            memory,
            disk,
            fee,
        }
    }

    /// component-wise addition. Saturates so that adding to [Limits::MAX] stays unlimited.
    pub fn add(&mut self, other: Limits) -> &mut Self {
        self.cpu = self.cpu.saturating_add(other.cpu);
        self.memory = self.memory.saturating_add(other.memory);
        self.disk = self.disk.saturating_add(other.disk);
        self.fee = self.fee.saturating_add(other.fee);
        self
    }

    /// component-wise subtraction.
    pub fn sub(&mut self, other: Limits) -> &mut Self {
        self.cpu = self.cpu.saturating_sub(other.cpu);
        self.memory = self.memory.saturating_sub(other.memory);
        self.disk = self.disk.saturating_sub(other.disk);
        self.fee = self.fee.saturating_sub(other.fee);
        self
    }

    /// true if any component of self is strictly greater than the same component of `limit`.
    pub fn exceeds(&self, limit: &Limits) -> bool {
        self.cpu > limit.cpu
            || self.memory > limit.memory
            || self.disk > limit.disk
            || self.fee > limit.fee
    }

    /// total gas of the resources given the price table. Every component is divided by its rate
    /// rounding up. A zero rate contributes nothing.
    pub fn to_gas(&self, price: &GasPrice) -> i64 {
        roundup(self.cpu, price.cpu_rate)
            .saturating_add(roundup(self.memory, price.mem_rate))
            .saturating_add(roundup(self.disk, price.disk_rate))
            .saturating_add(roundup(self.fee, price.fee_rate))
    }
}

/// GasPrice is the number of resource units bought by one unit of gas, per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPrice {
    pub cpu_rate: i64,
    pub mem_rate: i64,
    pub disk_rate: i64,
    pub fee_rate: i64,
}

fn roundup(n: i64, scale: i64) -> i64 {
    if scale == 0 {
        return 0;
    }
    // (n + scale - 1) / scale without overflowing near i64::MAX
    n / scale + i64::from(n % scale != 0)
}
