//! Wiring of the coordinator for the PDV point-of-sale backend.

pub mod keys;
pub mod queries;
pub mod routes;
