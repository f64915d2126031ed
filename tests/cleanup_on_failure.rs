//! Teardown of objects created by a step that then fails.
//!
//! `kubectl` and `helm` are replaced by shell scripts on `PATH` that record
//! their arguments, so no cluster is needed.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::TempDir;
use wanfed_vault::cleanup::CleanupStack;
use wanfed_vault::consul::ConsulHelmCluster;
use wanfed_vault::helpers::HelmValues;
use wanfed_vault::k8s::kustomize::deploy_kustomize;
use wanfed_vault::k8s::{KubeContext, KubectlOptions};
use wanfed_vault::vault::VaultCluster;
use wanfed_vault::TestConfig;

use common::init_logging;

const FAKE_KUBECTL: &str = r#"#!/bin/sh
echo "kubectl $*" >> "__LOG__"
for arg in "$@"; do
  if [ "$arg" = "kustomize" ]; then
    printf 'apiVersion: v1\nkind: Service\nmetadata:\n  name: static-server\n'
    exit 0
  fi
done
exit 0
"#;

const FAKE_HELM: &str = r#"#!/bin/sh
echo "helm $*" >> "__LOG__"
if [ "$1" = "install" ]; then
  echo "Error: INSTALLATION FAILED: resource conflict" >&2
  exit 1
fi
exit 0
"#;

/// Fake binaries in a temp dir prepended to `PATH`; restores `PATH` on drop.
struct FakeTools {
    dir: TempDir,
    old_path: String,
}

impl FakeTools {
    fn install() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        for (name, script) in [("kubectl", FAKE_KUBECTL), ("helm", FAKE_HELM)] {
            let path = dir.path().join(name);
            fs::write(&path, script.replace("__LOG__", &log.to_string_lossy())).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let old_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.path().display(), old_path));
        Self { dir, old_path }
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn fixture(&self) -> PathBuf {
        let dir = self.dir.path().join("static-server");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("kustomization.yaml"), "resources: []\n").unwrap();
        dir
    }
}

impl Drop for FakeTools {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.old_path);
    }
}

/// A context whose API server is never contacted by these code paths.
fn offline_context() -> KubeContext {
    let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
    KubeContext {
        label: "primary".to_string(),
        options: KubectlOptions::new(Some("kind-dc1".to_string()), "default"),
        client: kube::Client::try_from(config).unwrap(),
        api_server_url: "http://127.0.0.1:9".to_string(),
    }
}

fn called(calls: &[String], needle: &str) -> bool {
    calls.iter().any(|c| c.contains(needle))
}

#[tokio::test]
#[serial]
async fn test_applied_kustomization_is_deleted_when_deploy_fails() {
    init_logging();
    let tools = FakeTools::install();
    let fixture = tools.fixture();
    let ctx = offline_context();
    let mut cleanup = CleanupStack::new(false);

    let result = deploy_kustomize(&ctx, &mut cleanup, None, &fixture).await;
    assert!(result.is_err(), "rendering without a Deployment must fail");
    assert_eq!(cleanup.len(), 1);

    let report = cleanup.run(true).await;
    assert_eq!(report.completed.len(), 1);
    assert!(report.failed.is_empty());

    let calls = tools.calls();
    let apply = format!("apply -k {}", fixture.display());
    let delete = format!("delete -k {}", fixture.display());
    assert!(called(&calls, &apply), "calls: {:?}", calls);
    assert!(called(&calls, &delete), "calls: {:?}", calls);
}

#[tokio::test]
#[serial]
async fn test_failed_helm_install_is_uninstalled() {
    init_logging();
    let tools = FakeTools::install();
    let ctx = offline_context();
    let cfg = TestConfig {
        consul_helm_chart: "./local-chart".to_string(),
        ..TestConfig::default()
    };
    let cluster = ConsulHelmCluster::new(&HelmValues::new(), &ctx, &cfg, "rel");
    let mut cleanup = CleanupStack::new(false);

    let err = cluster.create(&mut cleanup).await.unwrap_err();
    assert!(err.to_string().contains("INSTALLATION FAILED"));
    assert_eq!(cleanup.len(), 1);

    cleanup.run(true).await;
    let calls = tools.calls();
    assert!(called(&calls, "helm install rel ./local-chart"), "calls: {:?}", calls);
    assert!(called(&calls, "helm uninstall rel"), "calls: {:?}", calls);
    assert!(called(&calls, "delete pvc -l release=rel"), "calls: {:?}", calls);
    assert!(called(&calls, "delete secret -l release=rel"), "calls: {:?}", calls);
}

#[tokio::test]
#[serial]
async fn test_failed_vault_install_is_uninstalled() {
    init_logging();
    let tools = FakeTools::install();
    let ctx = offline_context();
    let cfg = TestConfig {
        vault_helm_chart: "./vault-chart".to_string(),
        ..TestConfig::default()
    };
    let mut injector_only = HelmValues::new();
    injector_only.insert("server.enabled", "false");
    let mut cluster = VaultCluster::new(&ctx, &cfg, "vrel", &injector_only);
    let mut cleanup = CleanupStack::new(false);

    let err = cluster.create(&mut cleanup).await.unwrap_err();
    assert!(err.to_string().contains("INSTALLATION FAILED"));
    assert_eq!(cleanup.labels().collect::<Vec<_>>(), vec!["primary: vault release vrel"]);

    cleanup.run(true).await;
    let calls = tools.calls();
    assert!(called(&calls, "helm uninstall vrel"), "calls: {:?}", calls);
    assert!(
        called(&calls, "delete pvc -l app.kubernetes.io/instance=vrel"),
        "calls: {:?}",
        calls
    );
}

#[tokio::test]
#[serial]
async fn test_failed_release_is_kept_when_asked_to() {
    init_logging();
    let tools = FakeTools::install();
    let ctx = offline_context();
    let cfg = TestConfig {
        consul_helm_chart: "./local-chart".to_string(),
        ..TestConfig::default()
    };
    let cluster = ConsulHelmCluster::new(&HelmValues::new(), &ctx, &cfg, "rel");
    let mut cleanup = CleanupStack::new(true);

    assert!(cluster.create(&mut cleanup).await.is_err());
    let report = cleanup.run(true).await;

    assert_eq!(report.retained, vec!["primary: consul release rel".to_string()]);
    assert!(!called(&tools.calls(), "helm uninstall"));
}
