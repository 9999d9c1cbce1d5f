use super::*;
use crate::fixtures::*;
use binding_controller_k8s_api::{
    condition::find, registered_service::Constraints, ByteString, Secret, ServiceBinding,
};
use binding_controller_k8s_store::{MemoryConnector, MemoryStore};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use rstest::rstest;

const CLAIM: &str = "orders-db";

fn reconciler(fx: &Fixture) -> ClaimReconciler<MemoryStore, MemoryConnector> {
    ClaimReconciler::new(fx.store.clone(), fx.connector.clone())
}

/// An environment with one application namespace and an available database
/// offered to `dev` but not `prod`, whose port is kept in a secret.
async fn mk_fixture(environment: &str) -> Fixture {
    let fx = Fixture::new();
    fx.add_environment(mk_env("worker", environment, &["apps"], &[]))
        .await;
    fx.store
        .create(&Secret {
            metadata: meta("pg-creds"),
            string_data: Some(btreemap! { "port".to_string() => "5432".to_string() }),
            ..Default::default()
        })
        .await
        .unwrap();
    let service = mk_service(
        "pg",
        &[("type", "db"), ("engine", "postgres")],
        &[("host", "db.local")],
        &["dev", "!prod"],
    );
    fx.add_available(with_secret_value(service, "port", "pg-creds", "port"))
        .await;
    fx
}

fn ready(claim: &ServiceClaim) -> Condition {
    let status = claim.status.as_ref().expect("claim must have a status");
    find(&status.conditions, conditions::READY)
        .cloned()
        .expect("claim must have a Ready condition")
}

fn valid(claim: &ServiceClaim) -> Condition {
    let status = claim.status.as_ref().expect("claim must have a status");
    find(&status.conditions, conditions::VALID)
        .cloned()
        .expect("claim must have a Valid condition")
}

#[tokio::test]
async fn resolves_and_delivers_the_binding() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host", "port"], Target::environment_tag("dev")))
        .await
        .unwrap();

    reconciler(&fx).reconcile(NS, CLAIM).await.unwrap();

    let claim = fx.claim(CLAIM).await;
    let service = fx.service("pg").await;
    assert_eq!(claim.state(), Some(ClaimState::Resolved));
    assert!(finalizer::has(&claim, FINALIZER));
    let status = claim.status.clone().unwrap();
    assert!(!status.claim_id.unwrap_or_default().is_empty());
    assert_eq!(
        status.registered_service,
        Some(RegisteredServiceReference {
            name: "pg".to_string(),
            uid: service.uid().unwrap(),
        })
    );
    assert!(ready(&claim).is_true());
    assert_eq!(ready(&claim).reason, conditions::RESOLVED);
    assert_eq!(service.state(), Some(ServiceState::Claimed));

    let binding = fx
        .worker
        .get::<ServiceBinding>("apps", CLAIM)
        .await
        .unwrap()
        .expect("binding must be pushed");
    assert_eq!(binding.spec.service_endpoint_definition_secret, CLAIM);
    let secret = fx
        .worker
        .get::<Secret>("apps", CLAIM)
        .await
        .unwrap()
        .expect("secret must be pushed");
    assert_eq!(
        secret.data,
        Some(btreemap! {
            "host".to_string() => ByteString(b"db.local".to_vec()),
            "port".to_string() => ByteString(b"5432".to_vec()),
            "type".to_string() => ByteString(b"db".to_vec()),
        })
    );
    let owners = secret.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(Some(owners[0].uid.clone()), binding.uid());
}

#[tokio::test]
async fn excluded_environments_are_not_matched() {
    let fx = mk_fixture("prod").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("prod")))
        .await
        .unwrap();

    let error = reconciler(&fx).reconcile(NS, CLAIM).await.unwrap_err();
    assert!(matches!(error, Error::NoMatchingService(_)));

    let claim = fx.claim(CLAIM).await;
    assert_eq!(claim.state(), Some(ClaimState::Pending));
    assert!(!ready(&claim).is_true());
    assert_eq!(ready(&claim).reason, conditions::NO_MATCHING_SERVICE_FOUND);
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
    assert!(fx
        .worker
        .get::<ServiceBinding>("apps", CLAIM)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn vetoes_alone_admit_no_environment() {
    let fx = mk_fixture("dev").await;
    let mut service = fx.service("pg").await;
    service.spec.constraints = Some(Constraints {
        environments: vec!["!prod".to_string()],
    });
    fx.store.replace(&service).await.unwrap();
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();

    let error = reconciler(&fx).reconcile(NS, CLAIM).await.unwrap_err();
    assert!(matches!(error, Error::NoMatchingService(_)));
    assert_eq!(fx.claim(CLAIM).await.state(), Some(ClaimState::Pending));
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
}

#[tokio::test]
async fn services_lacking_requested_keys_are_not_claimed() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(
            CLAIM,
            &[("type", "db")],
            &["host", "password"],
            Target::environment_tag("dev"),
        ))
        .await
        .unwrap();

    let error = reconciler(&fx).reconcile(NS, CLAIM).await.unwrap_err();
    assert!(matches!(error, Error::MissingKeys { ref missing, .. } if *missing == ["password"]));

    let claim = fx.claim(CLAIM).await;
    assert_eq!(claim.state(), Some(ClaimState::Pending));
    assert!(ready(&claim).message.contains("password"));
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
}

#[tokio::test]
async fn reconciling_a_resolved_claim_changes_nothing() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();
    let reconciler = reconciler(&fx);
    reconciler.reconcile(NS, CLAIM).await.unwrap();

    let claim = fx.claim(CLAIM).await;
    let secret = fx.worker.get::<Secret>("apps", CLAIM).await.unwrap();

    reconciler.reconcile(NS, CLAIM).await.unwrap();
    assert_eq!(fx.claim(CLAIM).await, claim);
    assert_eq!(fx.worker.get::<Secret>("apps", CLAIM).await.unwrap(), secret);
}

#[tokio::test]
async fn a_service_is_bound_to_one_claim() {
    let fx = mk_fixture("dev").await;
    for name in ["first", "second"] {
        fx.store
            .create(&mk_claim(name, &[("type", "db")], &["host"], Target::environment_tag("dev")))
            .await
            .unwrap();
    }
    let stale = fx.service("pg").await;

    let reconciler = reconciler(&fx);
    reconciler.reconcile(NS, "first").await.unwrap();
    let error = reconciler.reconcile(NS, "second").await.unwrap_err();
    assert!(matches!(error, Error::NoMatchingService(_)));
    assert_eq!(fx.claim("first").await.state(), Some(ClaimState::Resolved));
    assert_eq!(fx.claim("second").await.state(), Some(ClaimState::Pending));

    // A claim that read the service before it was bound cannot bind it.
    let error = fx.store.replace_status(&stale).await.unwrap_err();
    assert!(error.is_conflict());
}

#[tokio::test]
async fn deleting_a_claim_releases_its_service() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();
    let reconciler = reconciler(&fx);
    reconciler.reconcile(NS, CLAIM).await.unwrap();

    fx.store.delete::<ServiceClaim>(NS, CLAIM).await.unwrap();
    reconciler.reconcile(NS, CLAIM).await.unwrap();

    assert!(fx.store.get::<ServiceClaim>(NS, CLAIM).await.unwrap().is_none());
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
    assert!(fx
        .worker
        .get::<ServiceBinding>("apps", CLAIM)
        .await
        .unwrap()
        .is_none());
    assert!(fx.worker.get::<Secret>("apps", CLAIM).await.unwrap().is_none());

    reconciler.reconcile(NS, CLAIM).await.unwrap();
}

#[tokio::test]
async fn failed_delivery_releases_the_service() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();
    let reconciler = reconciler(&fx);

    fx.worker.fail_writes("apps");
    reconciler.reconcile(NS, CLAIM).await.unwrap_err();
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
    assert_eq!(fx.claim(CLAIM).await.state(), Some(ClaimState::Pending));

    fx.worker.allow_writes("apps");
    reconciler.reconcile(NS, CLAIM).await.unwrap();
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Claimed));
    assert_eq!(fx.claim(CLAIM).await.state(), Some(ClaimState::Resolved));
}

#[tokio::test]
async fn claims_racing_for_a_service_bind_it_once() {
    let fx = mk_fixture("dev").await;
    for name in ["first", "second"] {
        fx.store
            .create(&mk_claim(name, &[("type", "db")], &["host"], Target::environment_tag("dev")))
            .await
            .unwrap();
    }
    // Both claims read the service as available before either marks it.
    let store = GatedStore::new(fx.store.clone()).hold_service_writes(2);
    let reconciler = ClaimReconciler::new(store, fx.connector.clone());

    let (first, second) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        tokio::join!(
            reconciler.reconcile(NS, "first"),
            reconciler.reconcile(NS, "second")
        )
    })
    .await
    .expect("reconciliations must complete");
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(error) if error.is_conflict())));

    let service = fx.service("pg").await;
    assert_eq!(service.state(), Some(ServiceState::Claimed));
    let claims = [fx.claim("first").await, fx.claim("second").await];
    let resolved = claims
        .iter()
        .filter(|c| c.state() == Some(ClaimState::Resolved))
        .collect::<Vec<_>>();
    assert_eq!(resolved.len(), 1);
    assert_eq!(
        resolved[0]
            .status
            .as_ref()
            .and_then(|s| s.registered_service.as_ref())
            .map(|r| r.uid.clone()),
        service.uid()
    );
    assert_eq!(
        claims
            .iter()
            .filter(|c| c.state() == Some(ClaimState::Pending))
            .count(),
        1
    );
}

#[tokio::test]
async fn unrecorded_resolutions_release_the_service() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();
    let store = GatedStore::new(fx.store.clone()).refuse_next_resolution();
    let reconciler = ClaimReconciler::new(store, fx.connector.clone());

    let error = reconciler.reconcile(NS, CLAIM).await.unwrap_err();
    assert!(error.is_conflict());
    assert_eq!(fx.claim(CLAIM).await.state(), Some(ClaimState::Pending));
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));

    reconciler.reconcile(NS, CLAIM).await.unwrap();
    assert_eq!(fx.claim(CLAIM).await.state(), Some(ClaimState::Resolved));
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Claimed));
}

#[tokio::test]
async fn claims_without_a_target_are_invalid() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::default()))
        .await
        .unwrap();

    reconciler(&fx).reconcile(NS, CLAIM).await.unwrap();

    let claim = fx.claim(CLAIM).await;
    assert_eq!(claim.state(), Some(ClaimState::Invalid));
    assert_eq!(valid(&claim).reason, conditions::MISSING_FIELD);
    assert_eq!(fx.service("pg").await.state(), Some(ServiceState::Available));
}

#[tokio::test]
async fn updating_immutable_fields_invalidates_the_claim() {
    let fx = mk_fixture("dev").await;
    fx.store
        .create(&mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev")))
        .await
        .unwrap();
    let reconciler = reconciler(&fx);
    reconciler.reconcile(NS, CLAIM).await.unwrap();

    let mut claim = fx.claim(CLAIM).await;
    claim.spec.service_endpoint_definition_keys = vec!["host".to_string(), "port".to_string()];
    fx.store.replace(&claim).await.unwrap();
    reconciler.reconcile(NS, CLAIM).await.unwrap();

    let claim = fx.claim(CLAIM).await;
    assert!(!valid(&claim).is_true());
    assert_eq!(valid(&claim).reason, conditions::UPDATED_IMMUTABLE_FIELD);
    assert!(valid(&claim).message.contains("serviceEndpointDefinitionKeys"));
    assert_eq!(claim.state(), Some(ClaimState::Resolved));
}

#[tokio::test]
async fn mirrored_claims_report_status_to_the_worker() {
    let fx = mk_fixture("dev").await;
    let mut remote = mk_claim(CLAIM, &[("type", "db")], &["host"], Target::default());
    remote.metadata.namespace = Some("apps".to_string());
    fx.worker.create(&remote).await.unwrap();

    let mut claim = mk_claim(
        CLAIM,
        &[("type", "db")],
        &["host"],
        Target::cluster_context("worker", "apps"),
    );
    claim.metadata.labels = Some(btreemap! {
        labels::CLUSTER_ENVIRONMENT.to_string() => "worker".to_string(),
        labels::NAMESPACE.to_string() => "apps".to_string(),
    });
    fx.store.create(&claim).await.unwrap();

    reconciler(&fx).reconcile(NS, CLAIM).await.unwrap();

    let local = fx.claim(CLAIM).await;
    assert_eq!(local.state(), Some(ClaimState::Resolved));
    let remote = fx
        .worker
        .get::<ServiceClaim>("apps", CLAIM)
        .await
        .unwrap()
        .expect("remote claim must exist");
    assert_eq!(remote.status, local.status);
    assert!(fx
        .worker
        .get::<ServiceBinding>("apps", CLAIM)
        .await
        .unwrap()
        .is_some());
}

#[rstest]
#[case(ClaimState::Pending, ServiceState::Available, None, true)]
#[case(ClaimState::Pending, ServiceState::Claimed, None, false)]
#[case(ClaimState::Resolved, ServiceState::Claimed, Some("uid-1"), true)]
#[case(ClaimState::Resolved, ServiceState::Claimed, Some("uid-2"), false)]
#[case(ClaimState::Resolved, ServiceState::Available, Some("uid-1"), false)]
#[case(ClaimState::Invalid, ServiceState::Available, None, false)]
fn service_changes_trigger_claims(
    #[case] claim_state: ClaimState,
    #[case] service_state: ServiceState,
    #[case] bound: Option<&str>,
    #[case] expected: bool,
) {
    let mut claim = mk_claim(CLAIM, &[("type", "db")], &["host"], Target::environment_tag("dev"));
    let status = claim.status_mut();
    status.state = Some(claim_state);
    status.registered_service = bound.map(|uid| RegisteredServiceReference {
        name: "pg".to_string(),
        uid: uid.to_string(),
    });

    let mut service = mk_service("pg", &[("type", "db")], &[("host", "db.local")], &[]);
    service.metadata.uid = Some("uid-1".to_string());
    service.set_state(service_state);

    assert_eq!(is_triggered_by(&claim, &service), expected);
}
