mod common;

use async_trait::async_trait;
use common::{cloned, commit, remote_with_history};
use parking_lot::Mutex;
use tether_storage::LocalStore;
use tether_porcelain::{
    pull, IntegrationStrategy, Integrator, PorcelainError, PullOptions, PullPlan,
};

#[derive(Default)]
struct FakeIntegrator {
    dirty: bool,
    plans: Mutex<Vec<PullPlan>>,
}

#[async_trait]
impl Integrator for FakeIntegrator {
    async fn is_dirty(&self) -> tether_porcelain::Result<bool> {
        Ok(self.dirty)
    }

    async fn integrate(&self, plan: &PullPlan) -> tether_porcelain::Result<()> {
        self.plans.lock().push(plan.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_pull_hands_plan_to_integrator() {
    let (remote, history) = remote_with_history();
    let store = cloned(&remote).await;
    let third = commit(&remote.store, "README", "third", &[history[1]]);
    remote.store.set_ref("refs/heads/main", third).unwrap();

    let integrator = FakeIntegrator::default();
    let outcome = pull(&remote, &store, &integrator, &PullOptions::default())
        .await
        .unwrap();

    let expected = PullPlan {
        branch: "refs/heads/main".into(),
        tracking_ref: "refs/remotes/origin/main".into(),
        target: third,
        strategy: IntegrationStrategy::Merge,
        autostash: false,
    };
    assert_eq!(outcome.exit_code(), 0);
    assert!(!outcome.up_to_date);
    assert_eq!(outcome.plan, expected);
    assert_eq!(*integrator.plans.lock(), vec![expected]);
    assert_eq!(outcome.fetch.objects_received, 3);
}

#[tokio::test]
async fn test_pull_rebase() {
    let (remote, history) = remote_with_history();
    let store = cloned(&remote).await;
    let third = commit(&remote.store, "README", "third", &[history[1]]);
    remote.store.set_ref("refs/heads/main", third).unwrap();

    let integrator = FakeIntegrator::default();
    let options = PullOptions {
        rebase: true,
        ..PullOptions::default()
    };
    let outcome = pull(&remote, &store, &integrator, &options).await.unwrap();
    assert_eq!(outcome.plan.strategy, IntegrationStrategy::Rebase);
}

#[tokio::test]
async fn test_pull_up_to_date() {
    let (remote, _) = remote_with_history();
    let store = cloned(&remote).await;

    let integrator = FakeIntegrator::default();
    let outcome = pull(&remote, &store, &integrator, &PullOptions::default())
        .await
        .unwrap();
    assert!(outcome.up_to_date);
    assert!(integrator.plans.lock().is_empty());
}

#[tokio::test]
async fn test_dirty_tree_refused() {
    let (remote, _) = remote_with_history();
    let store = cloned(&remote).await;
    let discoveries = remote.discoveries();

    let integrator = FakeIntegrator {
        dirty: true,
        ..FakeIntegrator::default()
    };
    let err = pull(&remote, &store, &integrator, &PullOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PorcelainError::DirtyWorkTree));
    assert_eq!(remote.discoveries(), discoveries);
}

#[tokio::test]
async fn test_dirty_tree_with_autostash() {
    let (remote, history) = remote_with_history();
    let store = cloned(&remote).await;
    let third = commit(&remote.store, "README", "third", &[history[1]]);
    remote.store.set_ref("refs/heads/main", third).unwrap();

    let integrator = FakeIntegrator {
        dirty: true,
        ..FakeIntegrator::default()
    };
    let options = PullOptions {
        autostash: true,
        ..PullOptions::default()
    };
    let outcome = pull(&remote, &store, &integrator, &options).await.unwrap();
    assert!(outcome.plan.autostash);
    assert_eq!(integrator.plans.lock().len(), 1);
}

#[tokio::test]
async fn test_clean_tree_skips_autostash() {
    let (remote, history) = remote_with_history();
    let store = cloned(&remote).await;
    let third = commit(&remote.store, "README", "third", &[history[1]]);
    remote.store.set_ref("refs/heads/main", third).unwrap();

    let integrator = FakeIntegrator::default();
    let options = PullOptions {
        autostash: true,
        ..PullOptions::default()
    };
    let outcome = pull(&remote, &store, &integrator, &options).await.unwrap();
    assert!(!outcome.plan.autostash);
    assert!(!integrator.plans.lock()[0].autostash);
}

#[tokio::test]
async fn test_pull_sends_local_tip_as_have() {
    let (remote, history) = remote_with_history();
    let store = cloned(&remote).await;
    let third = commit(&remote.store, "README", "third", &[history[1]]);
    remote.store.set_ref("refs/heads/main", third).unwrap();

    let integrator = FakeIntegrator::default();
    pull(&remote, &store, &integrator, &PullOptions::default())
        .await
        .unwrap();

    let lines = remote.upload_request_lines(remote.uploads() - 1);
    assert!(lines[0].starts_with(&format!("want {third} ")));
    assert!(lines.contains(&format!("have {}", history[1])));
    assert_eq!(lines.last().map(String::as_str), Some("done"));
}
