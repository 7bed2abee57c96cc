// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use chrono::{DateTime, Utc};
use common::{bump_mtime, descriptor_yaml, write_archive, write_exploded, Harness};
use depot_core::domain::artifact::{ArtifactKey, ArtifactStatus, BundleIdentity};
use depot_core::domain::error::DeploymentError;
use depot_core::domain::events::DeploymentEvent;
use depot_core::domain::properties::DeploymentProperties;
use depot_core::domain::region::ScopeOwner;
use std::fs;
use std::time::Duration;
use url::Url;

fn app_yaml(name: &str) -> String {
    descriptor_yaml("Application", name, "")
}

fn app_in_domain_yaml(name: &str, domain: &str) -> String {
    descriptor_yaml("Application", name, &format!("  domain: {}\n", domain))
}

fn domain_yaml(name: &str) -> String {
    descriptor_yaml("Domain", name, "")
}

#[tokio::test]
async fn test_corrupted_descriptor_is_quarantined() {
    let h = Harness::new();
    let dir = write_exploded(&h.apps(), "bad", "apiVersion: depot/v1\nkind: [");
    let key = ArtifactKey::application("bad");

    let report = h.service.start().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(h.app_status("bad"), Some(ArtifactStatus::DeploymentFailed));
    assert!(!h.app_anchor("bad").exists());
    assert!(h.service.is_quarantined(&dir));
    assert_eq!(h.listener.count("deployment_start", &key), 1);

    let report = h.service.trigger_now().await.unwrap();
    assert!(report.is_idle());
    assert_eq!(report.quarantined, 1);
    assert_eq!(h.listener.count("deployment_start", &key), 1);
}

#[tokio::test]
async fn test_domain_starts_before_dependents_and_outlives_them() {
    let h = Harness::new();
    write_exploded(&h.domains(), "shared", &domain_yaml("shared"));
    write_exploded(&h.apps(), "orders", &app_in_domain_yaml("orders", "shared"));
    let domain = ArtifactKey::domain("shared");
    let app = ArtifactKey::application("orders");

    h.service.start().await.unwrap();
    assert_eq!(h.domain_status("shared"), Some(ArtifactStatus::Started));
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
    assert!(h.journal.position(&domain, "start").unwrap() < h.journal.position(&app, "start").unwrap());
    assert_eq!(h.service.find_domain("shared").unwrap().dependents, vec!["orders".to_string()]);

    h.service.undeploy_domain("shared").await.unwrap();
    assert!(h.journal.position(&app, "dispose").unwrap() < h.journal.position(&domain, "dispose").unwrap());
    let events = h.listener.events();
    let app_done = events.iter().position(|e| e == "undeployment_success:application/orders").unwrap();
    let domain_gone = events.iter().position(|e| e == "undeployment_start:domain/shared").unwrap();
    assert!(app_done < domain_gone);

    // the dependent is undeployed like an explicit undeploy
    assert!(h.service.find_application("orders").is_none());
    assert!(!h.apps().join("orders").exists());
    assert!(!h.app_anchor("orders").exists());
    assert!(!h.state().join("application/orders").exists());
    assert!(!h.domains().join("shared").exists());
    assert!(h.service.get_zombie_applications().is_empty());
    assert_eq!(h.listener.count("undeployment_success", &app), 1);

    let report = h.service.trigger_now().await.unwrap();
    assert!(report.is_idle());
    assert_eq!(report.quarantined, 0);

    // a new domain deploys on its own
    write_exploded(&h.domains(), "shared", &domain_yaml("shared"));
    let report = h.service.trigger_now().await.unwrap();
    assert_eq!(report.deployed, vec![domain.clone()]);
    assert!(h.service.find_domain("shared").unwrap().dependents.is_empty());
}

#[tokio::test]
async fn test_application_waits_for_missing_domain() {
    let h = Harness::new();
    write_exploded(&h.apps(), "orders", &app_in_domain_yaml("orders", "later"));

    h.service.start().await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::DeploymentFailed));
    let failure = h.service.find_application("orders").unwrap().failure.unwrap();
    assert!(failure.contains("later"), "{}", failure);

    write_exploded(&h.domains(), "later", &domain_yaml("later"));
    h.service.trigger_now().await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
    assert!(h.service.get_zombie_applications().is_empty());
}

#[tokio::test]
async fn test_redeploy_properties_reused_cleared_and_replaced() {
    let h = Harness::new();
    let source = write_exploded(&h.dir.path().join("incoming"), "orders", &app_yaml("orders"));
    let url = Url::from_file_path(&source).unwrap();
    let key = ArtifactKey::application("orders");

    let initial = DeploymentProperties::from([("color", "blue"), ("size", "small")]);
    h.service.deploy(&url, Some(initial.clone())).await.unwrap();
    assert!(h.apps().join("orders").join("artifact.yaml").is_file());
    assert_eq!(h.journal.properties_of(&key), initial);

    h.service.redeploy("orders", None).await.unwrap();
    assert_eq!(h.journal.properties_of(&key), initial);
    assert_eq!(h.service.find_application("orders").unwrap().deployment_properties, initial);

    h.service.redeploy("orders", Some(DeploymentProperties::new())).await.unwrap();
    assert!(h.journal.properties_of(&key).is_empty());

    let replaced = DeploymentProperties::from([("color", "red")]);
    h.service.redeploy("orders", Some(replaced.clone())).await.unwrap();
    assert_eq!(h.journal.properties_of(&key).get("color"), Some("red"));
    assert_eq!(h.journal.properties_of(&key).get("size"), None);

    assert_eq!(h.listener.count("redeployment_success", &key), 3);
}

#[tokio::test]
async fn test_stop_survives_restart() {
    let mut h = Harness::new();
    write_exploded(&h.apps(), "orders", &app_yaml("orders"));
    let key = ArtifactKey::application("orders");

    h.service.start().await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
    h.service.stop_application("orders").await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Stopped));

    h.restart().await;
    h.service.start().await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Created));
    assert_eq!(h.journal.count(&key, "init"), 1);
    assert_eq!(h.journal.count(&key, "start"), 0);

    h.service.start_application("orders").await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));

    // started again, so the next restart starts it on deploy
    h.restart().await;
    h.service.start().await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
}

#[tokio::test]
async fn test_stopped_domain_holds_back_dependents() {
    let h = Harness::new();
    write_exploded(&h.domains(), "shared", &domain_yaml("shared"));
    write_exploded(&h.apps(), "orders", &app_in_domain_yaml("orders", "shared"));
    h.service.start().await.unwrap();

    h.service.stop_domain("shared").await.unwrap();
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Stopped));
    assert!(matches!(
        h.service.start_application("orders").await,
        Err(DeploymentError::InvalidTransition { .. })
    ));

    h.service.start_domain("shared").await.unwrap();
    assert_eq!(h.domain_status("shared"), Some(ArtifactStatus::Started));
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
}

#[tokio::test]
async fn test_shared_library_override_and_denylist() {
    let spec = "  plugins:
    - group: org.plugins
      name: first
      version: \"1.0.0\"
      exportedPackages: [org.foo]
    - group: org.plugins
      name: second
      version: \"1.0.0\"
      exportedPackages: [org.foo]
  sharedLibraries:
    - group: org.libs
      name: foo-lib
      version: \"2.0.0\"
      exportedPackages: [org.foo]
";
    let key = ArtifactKey::application("orders");

    let h = Harness::new();
    write_exploded(&h.apps(), "orders", &descriptor_yaml("Application", "orders", spec));
    h.service.start().await.unwrap();
    let resolved = h.journal.region_of(&key).unwrap().resolve_class("org.foo.Symbol").unwrap();
    assert_eq!(resolved.owner, ScopeOwner::SharedLibrary(BundleIdentity::new("org.libs", "foo-lib")));

    let h = Harness::with_config(|c| c.isolation.override_denylist = vec!["org.libs:foo-lib".to_string()]);
    write_exploded(&h.apps(), "orders", &descriptor_yaml("Application", "orders", spec));
    h.service.start().await.unwrap();
    let resolved = h.journal.region_of(&key).unwrap().resolve_class("org.foo.Symbol").unwrap();
    assert_eq!(resolved.owner, ScopeOwner::Plugin(BundleIdentity::new("org.plugins", "first")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_undeploy_never_interleaves_with_tick() {
    let h = Harness::with_config(|c| {
        c.scheduler.enabled = true;
        c.scheduler.poll_interval = Duration::from_millis(5);
    });
    write_exploded(&h.apps(), "empty-app", &app_yaml("empty-app"));
    h.service.start().await.unwrap();
    assert!(h.service.is_watching());
    let key = ArtifactKey::application("empty-app");

    // staged outside the root so the running watcher only sees complete directories
    let staging = h.dir.path().join("staging");
    for i in 0..4 {
        let name = format!("other-app-{}", i);
        let staged = write_exploded(&staging, &name, &app_yaml(&name));
        fs::rename(staged, h.apps().join(&name)).unwrap();
    }
    let ticks: Vec<_> = (0..4)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move { service.trigger_now().await })
        })
        .collect();
    let service = h.service.clone();
    let undeploy = tokio::spawn(async move { service.undeploy("empty-app").await });

    undeploy.await.unwrap().unwrap();
    for tick in ticks {
        tick.await.unwrap().unwrap();
    }

    assert_eq!(h.listener.count("undeployment_start", &key), 1);
    assert_eq!(h.listener.count("undeployment_success", &key), 1);
    let events = h.listener.events();
    let start = events.iter().position(|e| e == "undeployment_start:application/empty-app").unwrap();
    assert_eq!(events[start + 1], "undeployment_success:application/empty-app");
    assert!(h.service.find_application("empty-app").is_none());
    assert!(!h.apps().join("empty-app").exists());
    for i in 0..4 {
        let name = format!("other-app-{}", i);
        assert_eq!(h.app_status(&name), Some(ArtifactStatus::Started));
        assert_eq!(h.listener.count("deployment_success", &ArtifactKey::application(&name)), 1);
    }
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_broken_archive_recovers_after_fix() {
    let h = Harness::new();
    let archive = write_archive(&h.apps(), "broken-app", "apiVersion: depot/v1\nkind: [", &[]);

    h.service.start().await.unwrap();
    assert_eq!(h.app_status("broken-app"), Some(ArtifactStatus::DeploymentFailed));
    assert!(!h.app_anchor("broken-app").exists());
    let zombies = h.service.get_zombie_applications();
    let attempts = zombies.get("broken-app").unwrap();
    assert_eq!(attempts.len(), 1);
    let (uri, observed) = attempts.iter().next().unwrap();
    assert_eq!(uri.to_file_path().unwrap(), archive.canonicalize().unwrap());
    let modified: DateTime<Utc> = fs::metadata(&archive).unwrap().modified().unwrap().into();
    assert_eq!(*observed, modified);

    // untouched archive stays quarantined
    let report = h.service.trigger_now().await.unwrap();
    assert!(report.is_idle());

    write_archive(&h.apps(), "broken-app", &app_yaml("broken-app"), &[]);
    bump_mtime(&archive, 10);
    let report = h.service.trigger_now().await.unwrap();
    assert_eq!(report.deployed, vec![ArtifactKey::application("broken-app")]);
    assert_eq!(h.app_status("broken-app"), Some(ArtifactStatus::Started));
    assert!(h.app_anchor("broken-app").exists());
    assert!(h.service.get_zombie_applications().get("broken-app").is_none());
}

#[tokio::test]
async fn test_changed_archive_is_exploded_again() {
    let h = Harness::new();
    let archive = write_archive(&h.apps(), "orders", &app_yaml("orders"), &[("conf/v.txt", "1")]);
    h.service.start().await.unwrap();
    assert_eq!(fs::read_to_string(h.apps().join("orders/conf/v.txt")).unwrap(), "1");

    let report = h.service.trigger_now().await.unwrap();
    assert!(report.is_idle());

    write_archive(&h.apps(), "orders", &app_yaml("orders"), &[("conf/v.txt", "2")]);
    bump_mtime(&archive, 10);
    let report = h.service.trigger_now().await.unwrap();
    assert_eq!(report.redeployed, vec![ArtifactKey::application("orders")]);
    assert_eq!(fs::read_to_string(h.apps().join("orders/conf/v.txt")).unwrap(), "2");
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
}

#[tokio::test]
async fn test_descriptor_change_triggers_redeploy() {
    let h = Harness::new();
    let dir = write_exploded(&h.apps(), "orders", &app_yaml("orders"));
    let key = ArtifactKey::application("orders");
    h.service.start().await.unwrap();

    let descriptor = dir.join("artifact.yaml");
    fs::write(&descriptor, descriptor_yaml("Application", "orders", "  components: [ingest]\n")).unwrap();
    bump_mtime(&descriptor, 10);
    let report = h.service.trigger_now().await.unwrap();
    assert_eq!(report.redeployed, vec![key.clone()]);
    assert_eq!(h.listener.count("redeployment_success", &key), 1);
    assert_eq!(h.journal.count(&key, "create"), 2);

    let report = h.service.trigger_now().await.unwrap();
    assert!(report.is_idle());
}

#[tokio::test]
async fn test_deleting_anchor_or_files_undeploys() {
    let h = Harness::new();
    write_exploded(&h.apps(), "orders", &app_yaml("orders"));
    write_exploded(&h.apps(), "billing", &app_yaml("billing"));
    h.service.start().await.unwrap();
    assert!(h.app_anchor("orders").is_file());

    fs::remove_file(h.app_anchor("orders")).unwrap();
    fs::remove_dir_all(h.apps().join("billing")).unwrap();
    let report = h.service.trigger_now().await.unwrap();
    assert_eq!(report.undeployed.len(), 2);
    assert!(h.service.list_applications().is_empty());
    assert!(!h.apps().join("orders").exists());
}

#[tokio::test]
async fn test_domain_redeploy_redeploys_dependents() {
    let h = Harness::new();
    write_exploded(&h.domains(), "shared", &domain_yaml("shared"));
    write_exploded(&h.apps(), "orders", &app_in_domain_yaml("orders", "shared"));
    write_exploded(&h.apps(), "billing", &app_in_domain_yaml("billing", "shared"));
    h.service.start().await.unwrap();
    h.listener.clear();

    h.service.redeploy_domain("shared", None).await.unwrap();
    let events = h.listener.events();
    let domain_done = events.iter().position(|e| e == "deployment_success:domain/shared").unwrap();
    let billing = events.iter().position(|e| e == "redeployment_success:application/billing").unwrap();
    let orders = events.iter().position(|e| e == "redeployment_success:application/orders").unwrap();
    assert!(domain_done < billing && billing < orders);
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
    assert_eq!(h.app_status("billing"), Some(ArtifactStatus::Started));
}

#[tokio::test]
async fn test_lifecycle_failure_disposes_instance() {
    let h = Harness::new();
    h.journal.fail_start.lock().insert("orders".to_string());
    write_exploded(&h.apps(), "orders", &app_yaml("orders"));
    let key = ArtifactKey::application("orders");

    let report = h.service.start().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::DeploymentFailed));
    assert_eq!(h.journal.count(&key, "dispose"), 1);
    assert_eq!(h.listener.count("deployment_failure", &key), 1);
}

#[tokio::test]
async fn test_runtime_version_requirement() {
    let h = Harness::new();
    write_exploded(
        &h.apps(),
        "future",
        &descriptor_yaml("Application", "future", "  minRuntimeVersion: \">=99.0.0\"\n"),
    );
    h.service.start().await.unwrap();
    assert_eq!(h.app_status("future"), Some(ArtifactStatus::DeploymentFailed));
    assert_eq!(h.journal.count(&ArtifactKey::application("future"), "create"), 0);
}

#[tokio::test]
async fn test_components_follow_persisted_flags() {
    let h = Harness::new();
    write_exploded(
        &h.apps(),
        "orders",
        &descriptor_yaml("Application", "orders", "  components: [ingest]\n"),
    );
    let key = ArtifactKey::application("orders");
    h.service.start().await.unwrap();

    h.service.stop_component("orders", "ingest").await.unwrap();
    assert_eq!(h.journal.count(&key, "stop_component(ingest)"), 1);
    assert!(h.service.start_component("orders", "missing").await.is_err());
    h.service.start_component("orders", "ingest").await.unwrap();
    assert_eq!(h.journal.count(&key, "start_component(ingest)"), 1);
}

#[tokio::test]
async fn test_fixed_applications_are_not_watched() {
    let h = Harness::with_config(|c| {
        c.scheduler.enabled = true;
        c.scheduler.fixed_applications = Some(vec!["orders".to_string()]);
    });
    write_exploded(&h.domains(), "shared", &domain_yaml("shared"));
    write_exploded(&h.apps(), "orders", &app_in_domain_yaml("orders", "shared"));
    write_exploded(&h.apps(), "billing", &app_yaml("billing"));

    let report = h.service.start().await.unwrap();
    assert_eq!(report.deployed.len(), 2);
    assert_eq!(h.app_status("orders"), Some(ArtifactStatus::Started));
    assert!(h.service.find_application("billing").is_none());
    assert!(!h.service.is_watching());
}

#[tokio::test]
async fn test_watcher_deploys_new_artifacts() {
    let h = Harness::with_config(|c| c.scheduler.enabled = true);
    h.service.start().await.unwrap();
    assert!(h.service.is_watching());

    let mut events = h.service.subscribe_artifact(ArtifactKey::application("orders"));
    write_exploded(&h.apps(), "orders", &app_yaml("orders"));
    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, DeploymentEvent::DeploymentStarted { .. }));
    let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(second, DeploymentEvent::DeploymentSucceeded { .. }));

    h.service.shutdown().await;
    assert!(!h.service.is_watching());
    assert!(matches!(h.service.undeploy("orders").await, Err(DeploymentError::ShutDown)));
}
