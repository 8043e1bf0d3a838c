//! Request lifecycle core: status machine, capability gate, effect queue,
//! and the engine that ties them to the store.

pub mod effects;
pub mod engine;
pub mod gate;
pub mod status;
pub mod worker;
