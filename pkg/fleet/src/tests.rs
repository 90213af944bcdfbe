use super::*;
use pkg_cluster::ClusterClient;
use pkg_cluster::fake::{FakeClient, application};
use pkg_types::application::ApplicationSpec;
use std::time::Duration;

fn fleet(clients: Vec<(&str, FakeClient)>) -> Fleet {
    let clusters = Clusters::from_clients(
        clients
            .into_iter()
            .map(|(name, c)| (name.to_string(), Arc::new(c) as Arc<dyn ClusterClient>)),
    )
    .unwrap();
    Fleet::new(clusters, Policy::default())
}

fn apps(namespace: &str, count: usize) -> FakeClient {
    FakeClient::new().with_applications((0..count).map(|i| application(namespace, &format!("app-{i}"))))
}

async fn all_applications(
    fleet: &Fleet,
    policy: &Policy,
) -> Result<Aggregated<ApplicationSpec>, AggregateError> {
    fleet
        .aggregate(
            |cluster| async move { cluster.applications("").await },
            |_| true,
            policy,
        )
        .await
}

#[tokio::test]
async fn best_effort_returns_successful_subset() {
    let fleet = fleet(vec![
        ("c1", apps("n1", 100)),
        ("c2", FakeClient::new().failing("connection refused")),
        ("c3", apps("n1", 100)),
    ]);

    let result = all_applications(&fleet, &Policy::default()).await.unwrap();
    assert_eq!(result.items.len(), 200);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].cluster, "c2");
    assert_eq!(
        result.errors[0].kind,
        ErrorKind::Failed("upstream error: connection refused".to_string())
    );
}

#[tokio::test]
async fn all_or_nothing_fails_the_call() {
    let fleet = fleet(vec![
        ("c1", apps("n1", 100)),
        ("c2", FakeClient::new().failing("connection refused")),
        ("c3", apps("n1", 100)),
    ]);

    let policy = Policy::default().all_or_nothing();
    match all_applications(&fleet, &policy).await {
        Err(AggregateError::UpstreamFailure(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].cluster, "c2");
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_clusters_time_out() {
    let fleet = fleet(vec![
        ("fast", apps("n1", 1)),
        ("slow", apps("n1", 1).with_delay(Duration::from_secs(60))),
    ]);
    let policy = Policy {
        per_cluster_timeout: Duration::from_secs(5),
        ..Policy::default()
    };

    let result = all_applications(&fleet, &policy).await.unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::Timeout);

    let err = all_applications(&fleet, &policy.all_or_nothing()).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn order_is_independent_of_completion() {
    let fleet = fleet(vec![
        ("a", apps("n1", 2).with_delay(Duration::from_secs(3))),
        ("b", apps("n2", 2).with_delay(Duration::from_secs(1))),
        ("c", apps("n3", 2).with_delay(Duration::from_secs(2))),
    ]);

    for ordering in [Ordering::None, Ordering::StableByClusterName] {
        let policy = Policy {
            ordering,
            ..Policy::default()
        };
        let result = all_applications(&fleet, &policy).await.unwrap();
        let order: Vec<_> = result
            .items
            .iter()
            .map(|a| format!("{}/{}", a.cluster, a.name))
            .collect();
        assert_eq!(
            order,
            vec!["a/app-0", "a/app-1", "b/app-0", "b/app-1", "c/app-0", "c/app-1"]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn parallelism_bounds_running_tasks() {
    let slow = || apps("n1", 1).with_delay(Duration::from_secs(10));
    let fleet = fleet(vec![("a", slow()), ("b", slow()), ("c", slow())]);

    let start = tokio::time::Instant::now();
    all_applications(&fleet, &Policy::default()).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(11));

    let serial = Policy {
        max_parallelism: Some(1),
        ..Policy::default()
    };
    let start = tokio::time::Instant::now();
    all_applications(&fleet, &serial).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test]
async fn filter_applies_per_element() {
    let fleet = fleet(vec![("c1", apps("n1", 3)), ("c2", apps("n2", 3))]);
    let result = fleet
        .aggregate(
            |cluster| async move { cluster.applications("").await },
            |app: &ApplicationSpec| app.name == "app-1",
            &Policy::default(),
        )
        .await
        .unwrap();
    let clusters: Vec<_> = result.items.iter().map(|a| a.cluster.as_str()).collect();
    assert_eq!(clusters, vec!["c1", "c2"]);
}

#[tokio::test]
async fn selected_clusters_only() {
    let fleet = fleet(vec![("c1", apps("n1", 1)), ("c2", apps("n1", 1))]);
    let result = fleet
        .aggregate_selected(
            &["c2".to_string()],
            |cluster| async move { cluster.applications("").await },
            |_| true,
            &Policy::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].cluster, "c2");

    let unknown = fleet
        .aggregate_selected(
            &["c9".to_string()],
            |cluster| async move { cluster.applications("").await },
            |_| true,
            &Policy::default(),
        )
        .await;
    assert!(matches!(unknown, Err(AggregateError::Cluster(ClusterError::UnknownCluster(_)))));
}

#[test]
fn parallelism_is_capped() {
    let policy = Policy::default();
    assert_eq!(policy.parallelism(3), 3);
    assert_eq!(policy.parallelism(100), 32);
    assert_eq!(policy.parallelism(0), 1);
}

#[test]
fn policy_follows_aggregator_config() {
    let config = pkg_types::config::AggregatorConfig {
        max_parallelism: Some(4),
        per_cluster_timeout: 5,
        failure_mode: FailureMode::AllOrNothing,
        ordering: Ordering::None,
    };
    let policy = Policy::from(&config);
    assert_eq!(policy.parallelism(10), 4);
    assert_eq!(policy.per_cluster_timeout, Duration::from_secs(5));
    assert_eq!(policy.failure_mode, FailureMode::AllOrNothing);
    assert_eq!(policy.ordering, Ordering::None);
    assert_eq!(
        policy.with_failure_mode(FailureMode::BestEffort).failure_mode,
        FailureMode::BestEffort
    );
}
