//! Core process bookkeeping for pets
//!
//! pets starts local development processes declared in a `Petsfile`, exposes
//! them as named services and brings service graphs up in dependency order.
//! This crate holds everything below the script layer:
//!
//! - [`service`]: validated service names, tiers and keys
//! - [`registry`]: the durable, lock-serialized record of running processes
//! - [`runner`]: spawning commands into their own process groups
//! - [`health`]: waiting for a started process to accept TCP connections
//! - [`school`]: the dependency resolver that brings services up exactly once
//!
//! All state lives under the pets home directory (see [`home`]), so repeated
//! invocations observe what earlier ones started.

pub mod config;
pub mod health;
pub mod home;
pub mod logging;
pub mod registry;
pub mod runner;
pub mod school;
pub mod service;

pub use registry::{ProcessRecord, Registry, RegistryError};
pub use runner::{RunError, Runner, StartedProcess};
pub use school::{Provider, School, SchoolError};
pub use service::{KeyError, ServiceKey, ServiceName, Tier};

/// Boxed error used where arbitrary collaborator errors cross a seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
