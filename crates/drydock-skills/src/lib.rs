// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `drydock-skills` — skill discovery and system prompt rendering.
//!
//! A skill is a **first-level directory** under the skills root containing a
//! `Skill.md` file (filename matched case-insensitively):
//!
//! ```text
//! skills/
//! ├── data-analysis/
//! │   ├── Skill.md
//! │   └── scripts/        → bundled resources (ignored by discovery)
//! └── pdf-reports/
//!     └── Skill.md
//! ```
//!
//! Inside a user container the same tree is mounted read-only at `/skills`,
//! so the rendered prompt points the agent at
//! `/skills/<id>/Skill.md` and full bodies are loaded on demand through the
//! `read_file` tool — never over the network.
//!
//! ## Skill.md format
//!
//! ```markdown
//! ---
//! name: Data Analysis
//! description: Analyze CSV/Excel data with pandas.
//! version: 1.0.0
//! dependencies: pandas, openpyxl
//! ---
//!
//! # Body …
//!
//! ## When to Use This Skill
//! - User asks to analyze a spreadsheet
//! ```

pub mod prompt;
pub mod registry;

pub use prompt::render_system_prompt;
pub use registry::{parse_skill_file, RawSkillMeta, Skill, SkillRegistry};
