// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process HTTP tests for the side-endpoints.
//!
//! These run without a Docker daemon: skill endpoints never touch it, the
//! health endpoint reports the daemon state either way, and artifact
//! endpoints exercise the validation and error-mapping paths (400 for bad
//! names before any container work, 503 when no container can be acquired).

use std::fs;
use std::sync::Arc;

use drydock_config::ExecutorConfig;
use drydock_mcp::http::{side_router, HttpState};
use drydock_sandbox::{ContainerFs, ContainerManager};
use drydock_skills::SkillRegistry;
use tempfile::TempDir;

/// Start the side-endpoints on an ephemeral port; returns the base URL and
/// the tempdir backing the skills root.
async fn start_server(skills: &[(&str, &str)]) -> (String, TempDir) {
    let skills_root = TempDir::new().unwrap();
    for (id, frontmatter) in skills {
        let dir = skills_root.path().join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Skill.md"), format!("---\n{frontmatter}---\n\nBody of {id}.")).unwrap();
    }

    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let manager = Arc::new(ContainerManager::new(
        docker,
        ExecutorConfig {
            // Deliberately nonexistent so acquire always fails fast with a
            // 503-mapped error even when a daemon happens to be present.
            image: "drydock-test-no-such-image:none".into(),
            ..Default::default()
        },
    ));

    let state = HttpState {
        fs: Arc::new(ContainerFs::new(manager.clone())),
        manager,
        skills: Arc::new(SkillRegistry::new(skills_root.path())),
        service_name: "drydock-tools".into(),
    };

    let router = side_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), skills_root)
}

#[tokio::test]
async fn health_reports_service_and_flag() {
    let (base, _root) = start_server(&[]).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    let status = resp.status().as_u16();
    assert!(status == 200 || status == 503, "unexpected status {status}");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "drydock-tools");
    assert!(body["client_initialized"].is_boolean());
    if status == 200 {
        assert_eq!(body["status"], "healthy");
    } else {
        assert_eq!(body["status"], "unhealthy");
    }
}

#[tokio::test]
async fn skills_index_lists_metadata_only() {
    let (base, _root) = start_server(&[
        ("data-analysis", "name: Data Analysis\ndescription: Crunch numbers.\nversion: 1.0.0\n"),
        ("pdf", "name: PDF\ndescription: Make PDFs.\n"),
    ])
    .await;

    let body: serde_json::Value = reqwest::get(format!("{base}/skills"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 2);
    let skills = body["skills"].as_array().unwrap();
    assert_eq!(skills[0]["id"], "data-analysis");
    assert_eq!(skills[0]["version"], "1.0.0");
    // Index must not inline bodies.
    assert!(skills[0].get("body").is_none());
}

#[tokio::test]
async fn skill_detail_includes_body_and_404s() {
    let (base, _root) =
        start_server(&[("pdf", "name: PDF\ndescription: Make PDFs.\n")]).await;

    let resp = reqwest::get(format!("{base}/skills/pdf")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "PDF");
    assert!(body["body"].as_str().unwrap().contains("Body of pdf."));

    let missing = reqwest::get(format!("{base}/skills/absent")).await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn invalid_artifact_names_rejected_with_400() {
    let (base, _root) = start_server(&[]).await;

    // ".." itself is normalized away by URL parsing before it reaches the
    // router, so the traversal cases use encoded separators instead.
    for bad in [".hidden", "a%2Fb", "a%5Cb"] {
        let resp = reqwest::get(format!("{base}/u1/artifacts/{bad}"))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400, "name {bad:?} should be rejected");
    }
}

#[tokio::test]
async fn artifacts_unavailable_container_maps_to_503() {
    let (base, _root) = start_server(&[]).await;

    let resp = reqwest::get(format!("{base}/u1/artifacts")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    let fetch = reqwest::get(format!("{base}/u1/artifacts/chart.png"))
        .await
        .unwrap();
    assert_eq!(fetch.status().as_u16(), 503);
}
