#[cfg(test)]
#[allow(dead_code)]
pub mod contracts;
pub use contracts::*;

#[cfg(test)]
#[allow(dead_code)]
pub mod simulate_state;
pub use simulate_state::*;

#[cfg(test)]
#[allow(dead_code)]
pub mod test_data;
pub use test_data::*;
