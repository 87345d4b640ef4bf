//! Connection descriptors for the analytical server.
//!
//! Descriptors are plain values threaded into every call; no live session
//! is ever stored here.

mod descriptor;

pub use descriptor::{ConnectionDescriptor, ConnectionDescriptorBuilder, Credential};
