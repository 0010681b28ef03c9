// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "drydock",
    about = "Multi-tenant code-execution backend for AI agents",
    version
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the tool & prompt server (MCP at /mcp plus HTTP side-endpoints).
    Tools {
        /// Listen address override.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run the OpenAI-compatible agent bridge.
    Bridge {
        /// Listen address override.
        #[arg(long)]
        listen: Option<String>,
    },
    /// List the skills discovered under the configured skills root.
    Skills,
    /// Print the merged configuration as YAML.
    ShowConfig,
}
