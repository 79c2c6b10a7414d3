//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Exchange DTOs with callers and keep entity tracking internal.

pub mod dev_test_service;
