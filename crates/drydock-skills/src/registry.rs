// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery and parsing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::warn;

/// Upper bound on a single `Skill.md`; larger files are skipped.
const MAX_SKILL_FILE_BYTES: u64 = 256 * 1024;

/// Display-name length cap; longer values are clamped.
const MAX_NAME_CHARS: usize = 64;

/// Description length cap; longer values are clamped.
const MAX_DESCRIPTION_CHARS: usize = 200;

/// A fully parsed skill.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Stable id — the directory name under the skills root.  This is the
    /// segment in the container path `/skills/<id>/Skill.md`.
    pub id: String,
    /// Human-readable display name from front-matter.
    pub name: String,
    /// One-or-few-sentence description from front-matter.
    pub description: String,
    /// Optional semver-ish version string.
    pub version: Option<String>,
    /// Free-form dependency note (not interpreted).
    pub dependencies: Option<String>,
    /// Markdown body — everything after the closing `---` fence.
    pub body: String,
}

/// Front-matter schema.  Unknown keys are preserved in `extra` but ignored.
#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: String,
    description: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: Option<serde_yaml::Value>,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: HashMap<String, serde_yaml::Value>,
}

/// Parse a raw `Skill.md` string into front-matter fields and body.
///
/// The file must begin with a `---` fence line; the closing `---` delimits
/// the YAML block.  Returns `None` when the front-matter is missing,
/// malformed, or lacks the required `name`/`description` keys.
#[must_use]
pub fn parse_skill_file(raw: &str) -> Option<(RawSkillMeta, String)> {
    let rest = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    // Body starts after "\n---" (4 bytes); strip one leading newline.
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: RawFrontmatter = serde_yaml::from_str(yaml_block).ok()?;
    if fm.name.trim().is_empty() || fm.description.trim().is_empty() {
        return None;
    }

    let dependencies = fm.dependencies.map(|v| match v {
        serde_yaml::Value::String(s) => s,
        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
    });

    Some((
        RawSkillMeta {
            name: fm.name.trim().to_string(),
            description: fm.description.trim().to_string(),
            version: fm.version.filter(|v| !v.trim().is_empty()),
            dependencies,
        },
        body,
    ))
}

/// Parsed front-matter fields, before length clamping.
#[derive(Debug)]
pub struct RawSkillMeta {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub dependencies: Option<String>,
}

/// Clamp `s` to at most `max` characters.
fn clamp(s: String, max: usize, what: &str, id: &str) -> String {
    if s.chars().count() <= max {
        return s;
    }
    warn!(skill = %id, what, max, "clamping over-length front-matter field");
    s.chars().take(max).collect()
}

/// Lazily loaded, atomically reloadable skill collection.
///
/// The first call to [`SkillRegistry::skills`] scans the root; subsequent
/// calls reuse the cached slice until [`SkillRegistry::reload`] swaps the
/// whole collection in one step.
pub struct SkillRegistry {
    root: PathBuf,
    skills: RwLock<Option<Arc<[Skill]>>>,
}

impl SkillRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skills: RwLock::new(None),
        }
    }

    /// The currently loaded skills, scanning the root on first use.
    pub fn skills(&self) -> Arc<[Skill]> {
        if let Some(loaded) = self.skills.read().expect("skills lock").as_ref() {
            return loaded.clone();
        }
        let scanned: Arc<[Skill]> = scan_skills_root(&self.root).into();
        let mut slot = self.skills.write().expect("skills lock");
        // Another thread may have raced the scan; first writer wins so both
        // observers see one consistent collection.
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        *slot = Some(scanned.clone());
        scanned
    }

    /// Re-scan the root and atomically replace the collection.
    pub fn reload(&self) -> Arc<[Skill]> {
        let scanned: Arc<[Skill]> = scan_skills_root(&self.root).into();
        *self.skills.write().expect("skills lock") = Some(scanned.clone());
        scanned
    }

    /// Look up a single skill by id.
    pub fn get(&self, id: &str) -> Option<Skill> {
        self.skills().iter().find(|s| s.id == id).cloned()
    }
}

/// Find the `Skill.md` file inside `dir`, accepting any capitalisation.
fn find_skill_md(dir: &Path) -> Option<PathBuf> {
    let canonical = dir.join("Skill.md");
    if canonical.is_file() {
        return Some(canonical);
    }
    std::fs::read_dir(dir).ok()?.flatten().find_map(|e| {
        let p = e.path();
        if p.is_file()
            && p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.eq_ignore_ascii_case("skill.md"))
                .unwrap_or(false)
        {
            Some(p)
        } else {
            None
        }
    })
}

/// Scan the skills root for first-level skill directories.  Returns skills
/// sorted by id so downstream rendering is deterministic.
fn scan_skills_root(root: &Path) -> Vec<Skill> {
    let Ok(entries) = std::fs::read_dir(root) else {
        warn!(root = %root.display(), "skills root not readable; no skills loaded");
        return Vec::new();
    };

    let mut skills = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let Some(skill_md) = find_skill_md(&dir) else {
            continue;
        };

        let size = skill_md.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_SKILL_FILE_BYTES {
            warn!(skill = %id, size, max = MAX_SKILL_FILE_BYTES, "skipping oversized Skill.md");
            continue;
        }

        let raw = match std::fs::read_to_string(&skill_md) {
            Ok(s) => s,
            Err(e) => {
                warn!(skill = %id, error = %e, "failed to read Skill.md");
                continue;
            }
        };

        let Some((meta, body)) = parse_skill_file(&raw) else {
            warn!(skill = %id, "failed to parse Skill.md front-matter — skipping");
            continue;
        };

        skills.push(Skill {
            name: clamp(meta.name, MAX_NAME_CHARS, "name", &id),
            description: clamp(meta.description, MAX_DESCRIPTION_CHARS, "description", &id),
            version: meta.version,
            dependencies: meta.dependencies,
            body,
            id,
        });
    }

    skills.sort_by(|a, b| a.id.cmp(&b.id));
    skills
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_skill(root: &Path, id: &str, frontmatter: &str, body: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Skill.md"), format!("---\n{frontmatter}---\n\n{body}")).unwrap();
    }

    // ── parse_skill_file ──────────────────────────────────────────────────────

    #[test]
    fn parse_valid_frontmatter() {
        let raw = "---\nname: Data Analysis\ndescription: Crunch numbers.\n---\n\nBody here.";
        let (meta, body) = parse_skill_file(raw).expect("should parse");
        assert_eq!(meta.name, "Data Analysis");
        assert_eq!(meta.description, "Crunch numbers.");
        assert_eq!(body, "Body here.");
        assert!(meta.version.is_none());
    }

    #[test]
    fn parse_with_version_and_dependencies() {
        let raw = "---\nname: X\ndescription: D.\nversion: 1.2.3\ndependencies: pandas, numpy\n---\n\nB";
        let (meta, _) = parse_skill_file(raw).unwrap();
        assert_eq!(meta.version.as_deref(), Some("1.2.3"));
        assert_eq!(meta.dependencies.as_deref(), Some("pandas, numpy"));
    }

    #[test]
    fn parse_preserves_unknown_keys_without_failing() {
        let raw = "---\nname: X\ndescription: D.\nauthor: someone\ntags: [a, b]\n---\n\nB";
        assert!(parse_skill_file(raw).is_some());
    }

    #[test]
    fn parse_missing_required_keys_returns_none() {
        assert!(parse_skill_file("---\nname: OnlyName\n---\n\nB").is_none());
        assert!(parse_skill_file("---\ndescription: OnlyDesc\n---\n\nB").is_none());
    }

    #[test]
    fn parse_without_fence_returns_none() {
        assert!(parse_skill_file("# Just markdown\n\nNo front-matter.").is_none());
    }

    #[test]
    fn parse_body_keeps_horizontal_rules() {
        let raw = "---\nname: X\ndescription: D.\n---\n\nPart one.\n\n---\n\nPart two.";
        let (_, body) = parse_skill_file(raw).unwrap();
        assert!(body.contains("Part one."));
        assert!(body.contains("Part two."));
    }

    // ── SkillRegistry ─────────────────────────────────────────────────────────

    #[test]
    fn empty_root_yields_no_skills() {
        let tmp = TempDir::new().unwrap();
        let reg = SkillRegistry::new(tmp.path());
        assert!(reg.skills().is_empty());
    }

    #[test]
    fn discovers_first_level_skills_sorted() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "zeta", "name: Z\ndescription: Zd.\n", "");
        write_skill(tmp.path(), "alpha", "name: A\ndescription: Ad.\n", "");

        let reg = SkillRegistry::new(tmp.path());
        let skills = reg.skills();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].id, "alpha");
        assert_eq!(skills[1].id, "zeta");
    }

    #[test]
    fn lowercase_skill_md_accepted() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("casey");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("skill.md"), "---\nname: C\ndescription: D.\n---\nB").unwrap();

        let reg = SkillRegistry::new(tmp.path());
        assert_eq!(reg.skills().len(), 1);
    }

    #[test]
    fn directory_without_skill_md_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("not-a-skill")).unwrap();
        fs::write(tmp.path().join("not-a-skill/README.md"), "hi").unwrap();

        let reg = SkillRegistry::new(tmp.path());
        assert!(reg.skills().is_empty());
    }

    #[test]
    fn malformed_skill_skipped_others_survive() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "good", "name: G\ndescription: Gd.\n", "body");
        let bad = tmp.path().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("Skill.md"), "no front matter at all").unwrap();

        let reg = SkillRegistry::new(tmp.path());
        let skills = reg.skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].id, "good");
    }

    #[test]
    fn over_length_fields_are_clamped() {
        let tmp = TempDir::new().unwrap();
        let long_name = "N".repeat(100);
        let long_desc = "D".repeat(300);
        write_skill(
            tmp.path(),
            "long",
            &format!("name: {long_name}\ndescription: {long_desc}\n"),
            "",
        );

        let reg = SkillRegistry::new(tmp.path());
        let skills = reg.skills();
        assert_eq!(skills[0].name.chars().count(), 64);
        assert_eq!(skills[0].description.chars().count(), 200);
    }

    #[test]
    fn reload_picks_up_new_skill() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "one", "name: One\ndescription: D.\n", "");
        let reg = SkillRegistry::new(tmp.path());
        assert_eq!(reg.skills().len(), 1);

        write_skill(tmp.path(), "two", "name: Two\ndescription: D.\n", "");
        // Cached until an explicit reload.
        assert_eq!(reg.skills().len(), 1);
        assert_eq!(reg.reload().len(), 2);
        assert_eq!(reg.skills().len(), 2);
    }

    #[test]
    fn get_by_id() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "pdf", "name: PDF\ndescription: D.\n", "body text");
        let reg = SkillRegistry::new(tmp.path());
        let skill = reg.get("pdf").unwrap();
        assert_eq!(skill.name, "PDF");
        assert!(skill.body.contains("body text"));
        assert!(reg.get("absent").is_none());
    }

    #[test]
    fn oversized_skill_md_skipped() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("big");
        fs::create_dir_all(&dir).unwrap();
        let big = format!("---\nname: B\ndescription: D.\n---\n\n{}", "x".repeat(300 * 1024));
        fs::write(dir.join("Skill.md"), big).unwrap();

        let reg = SkillRegistry::new(tmp.path());
        assert!(reg.skills().is_empty());
    }
}
