//! JSON-RPC (MCP) debugging control plane for the VICE emulator.
//!
//! This crate provides:
//! - A tool registry covering execution control, registers, memory,
//!   checkpoints, tracing, interrupt logging and snapshots.
//! - An execution bridge that runs every tool on the thread owning the
//!   machine, between instructions.
//! - A newline-delimited JSON-RPC transport over TCP or stdio.
//!
//! The emulation core is reached only through the traits in [`machine`];
//! [`machine::headless::HeadlessMachine`] stands in for it in the binary and
//! the tests.

pub mod address;
pub mod bridge;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod debug;
pub mod error;
pub mod execution;
pub mod hardening;
pub mod interrupt_log;
pub mod machine;
pub mod memory;
pub mod params;
pub mod registers;
pub mod registry;
pub mod rpc;
pub mod slots;
pub mod snapshot;
pub mod symbols;
pub mod trace;

/// Server version reported by `initialize` and `vice.ping`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::bridge::{BridgeHandle, ExecutionContext};
pub use crate::context::McpContext;
pub use crate::error::{ErrorCode, ToolError, ToolResult};
pub use crate::rpc::{Dispatcher, TransportError};
