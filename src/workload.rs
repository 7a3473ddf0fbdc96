//! Resource-consumption routines.
//!
//! Nothing here knows about HTTP. The routines take already validated inputs,
//! have no error path and keep no state between calls; every invocation owns
//! what it allocates and is safe to run concurrently with any other.

pub mod cpu;
pub mod delay;
pub mod memory;
pub mod params;

pub use cpu::{burn, burn_parallel, CpuBurn, StopSignal};
pub use delay::{sleep_for, Delay};
pub use memory::{allocate, Allocation};
pub use params::{CpuParams, CpuQuery, MemoryParams, MemoryQuery, RelayQuery, TimeQuery};
