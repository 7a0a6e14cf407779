//! Adapters - implementations of the port traits.

pub mod ai;
