//! Domain model and storage contracts.
//!
//! # Responsibility
//! - Define the entity capability set consumed by the generic repository.
//! - Define the DevTest record in storage and transport shapes.
//!
//! # Invariants
//! - Identity is store-generated and immutable after first persistence.

pub mod entity;
pub mod identity;
