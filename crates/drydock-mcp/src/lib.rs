// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `drydock-mcp` — the tool & prompt server.
//!
//! Exposes four container-backed tools and one dynamic prompt over MCP
//! (streamable HTTP at `/mcp`), plus plain HTTP side-endpoints for health,
//! skill listing, and artifact download.
//!
//! # Architecture
//!
//! ```text
//! agent runtime ──► POST /mcp  (JSON-RPC, x-user-id header)
//!                       │
//!                       ▼
//!                ToolServerHandler (rmcp ServerHandler)
//!                       │
//!                       ▼
//!                ToolRegistry ──► Tool::execute(user_id, call)
//!                       │
//!                       ▼
//!                Executor / ContainerFs ──► user's container
//!
//! browser / UI ──► GET /health /skills /{user}/artifacts  (no MCP)
//! ```
//!
//! Every tool invocation must carry an `x-user-id` header; the server never
//! trusts user ids embedded in argument payloads.

pub mod builtin;
pub mod http;
pub mod registry;
pub mod server;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use server::ToolServerHandler;
pub use tool::{Tool, ToolCall, ToolOutput};

use std::sync::Arc;

use drydock_sandbox::{ContainerFs, ContainerManager, Executor};

/// Build the standard four-tool registry over a shared container manager.
pub fn build_registry(manager: Arc<ContainerManager>) -> ToolRegistry {
    let executor = Arc::new(Executor::new(manager.clone()));
    let fs = Arc::new(ContainerFs::new(manager));

    let mut registry = ToolRegistry::new();
    registry.register(builtin::execute_bash::ExecuteBashTool::new(executor));
    registry.register(builtin::write_file::WriteFileTool::new(fs.clone()));
    registry.register(builtin::read_file::ReadFileTool::new(fs.clone()));
    registry.register(builtin::read_docstring::ReadDocstringTool::new(fs));
    registry
}
