// Test harness module
// Concurrent load simulator for the factory

pub mod simulator;

pub use simulator::*;
