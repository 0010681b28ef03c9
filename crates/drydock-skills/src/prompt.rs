// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt rendering.
//!
//! The prompt is a pure function of the skill slice: same skills in, same
//! bytes out.  Nothing here reads the clock, the environment, or any other
//! ambient state.

use crate::registry::Skill;

/// Heading that marks the use-case section inside a skill body.
const WHEN_TO_USE_HEADING: &str = "## When to Use This Skill";

/// Render the agent system prompt for the given skill set.
#[must_use]
pub fn render_system_prompt(skills: &[Skill]) -> String {
    let mut out = String::with_capacity(4096);

    out.push_str(
        "You are a coding agent operating inside a dedicated Linux container.\n\
         \n\
         ## Environment\n\
         \n\
         - Your working directory is `/workspace` (writable).\n\
         - Files saved under `/artifacts` are published to the user; write final\n\
           outputs (charts, reports, exports) there.\n\
         - `/tools` and `/skills` are read-only reference mounts.\n\
         - The container persists between your commands within a conversation.\n\
         \n\
         ## Tools\n\
         \n\
         - `execute_bash(command, timeout)` — run a shell command; returns exit\n\
           code, stdout, and stderr. Long commands are cut off at the timeout\n\
           (default 30 s) with partial output.\n\
         - `write_file(file_path, content)` — create or overwrite a file,\n\
           creating parent directories as needed.\n\
         - `read_file(file_path, offset, line_count)` — read a text file, or a\n\
           window of it for large files.\n\
         - `read_docstring(file_path, function_name)` — return the docstring of\n\
           a top-level Python function without running the module.\n",
    );

    if skills.is_empty() {
        out.push_str("\n## Skills\n\nNo skills are installed.\n");
        return out;
    }

    out.push_str(
        "\n## Skills\n\
         \n\
         Skill documents extend your abilities for specific domains. Each entry\n\
         below lists the container path of the full document. When a request\n\
         matches a skill, read its document with `read_file` before starting —\n\
         do not fetch skills over the network.\n\n",
    );

    for skill in skills {
        out.push_str(&format!("### {} (`{}`)\n", skill.name, skill.id));
        out.push_str(&format!("- Description: {}\n", skill.description));
        if let Some(version) = &skill.version {
            out.push_str(&format!("- Version: {version}\n"));
        }
        out.push_str(&format!("- Document: `/skills/{}/Skill.md`\n", skill.id));
        let use_cases = extract_use_cases(&skill.body);
        if !use_cases.is_empty() {
            out.push_str("- Use when:\n");
            for case in use_cases {
                out.push_str(&format!("  - {case}\n"));
            }
        }
        out.push('\n');
    }

    out
}

/// Harvest the bullet items under a `## When to Use This Skill` heading.
///
/// Collection stops at the next heading.  Returns an empty list when the
/// section is absent.
fn extract_use_cases(body: &str) -> Vec<String> {
    let mut cases = Vec::new();
    let mut in_section = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(WHEN_TO_USE_HEADING) {
            in_section = true;
            continue;
        }
        if in_section {
            if trimmed.starts_with('#') {
                break;
            }
            if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                let item = item.trim();
                if !item.is_empty() {
                    cases.push(item.to_string());
                }
            }
        }
    }
    cases
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
