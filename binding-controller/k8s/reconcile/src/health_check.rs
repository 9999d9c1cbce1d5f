use crate::Result;
use binding_controller_k8s_api::{
    api::{
        batch::v1::{CronJobSpec, JobSpec, JobTemplateSpec},
        core::v1::{
            Capabilities, Container, PodSecurityContext, PodSpec, PodTemplateSpec,
            SeccompProfile, SecurityContext,
        },
    },
    registered_service::{HealthCheck, ServiceState},
    CronJob, Job, ObjectMeta, OwnerReference, RegisteredService, Resource, ResourceExt,
};
use binding_controller_k8s_store::{create_or_update, delete_if_exists, Store};
use tracing::{debug, info};

const CONTAINER_NAME: &str = "healthcheck";
const RUN_AS: i64 = 65530;

/// Determines a service's state from its health check, creating or updating
/// the CronJob that runs it.
pub(crate) async fn check<S: Store>(
    store: &S,
    service: &RegisteredService,
    health: &HealthCheck,
) -> Result<ServiceState> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let current = service.state();

    let existing = store.get::<CronJob>(&namespace, &name).await?;
    let cron_job = create_or_update(store, cron_job(service, health), |current, desired| {
        current.metadata.owner_references = desired.metadata.owner_references;
        current.spec = desired.spec;
    })
    .await?;
    let Some(existing) = existing else {
        info!(%namespace, service = %name, "Created health check");
        return Ok(ServiceState::Unknown);
    };

    let uid = existing.uid().or(cron_job.uid()).unwrap_or_default();
    let jobs = store.list::<Job>(&namespace, None).await?;
    let outcome = outcome(jobs.iter().filter(|job| is_owned_by(*job, &uid)));
    debug!(%namespace, service = %name, ?outcome, "Health check outcome");

    Ok(match outcome {
        Outcome::Completed if current == Some(ServiceState::Claimed) => ServiceState::Claimed,
        Outcome::Completed => ServiceState::Available,
        Outcome::Failed => ServiceState::Unreachable,
        Outcome::Pending => ServiceState::Unknown,
    })
}

/// Deletes health check CronJobs owned by `service`.
pub(crate) async fn remove<S: Store>(store: &S, service: &RegisteredService) -> Result<()> {
    let namespace = service.namespace().unwrap_or_default();
    let Some(uid) = service.uid() else {
        return Ok(());
    };
    for cron_job in store.list::<CronJob>(&namespace, None).await? {
        if is_owned_by(&cron_job, &uid) {
            let name = cron_job.name_any();
            delete_if_exists::<_, CronJob>(store, &namespace, &name).await?;
            info!(%namespace, cronjob = %name, "Deleted health check");
        }
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Pending,
}

/// Any completed job marks the check as passing; otherwise any failed job
/// marks it as failing.
fn outcome<'j>(jobs: impl Iterator<Item = &'j Job>) -> Outcome {
    let mut outcome = Outcome::Pending;
    for job in jobs {
        let conditions = job.status.iter().flat_map(|s| s.conditions.iter().flatten());
        for c in conditions {
            if c.status != "True" {
                continue;
            }
            match c.type_.as_str() {
                "Complete" => return Outcome::Completed,
                "Failed" => outcome = Outcome::Failed,
                _ => {}
            }
        }
    }
    outcome
}

fn is_owned_by<K: Resource>(obj: &K, uid: &str) -> bool {
    obj.owner_references().iter().any(|o| o.uid == uid)
}

fn cron_job(service: &RegisteredService, check: &HealthCheck) -> CronJob {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(check.container.image.clone()),
        command: Some(check.container.command.clone()).filter(|c| !c.is_empty()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            privileged: Some(false),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    CronJob {
        metadata: ObjectMeta {
            namespace: service.namespace(),
            name: Some(service.name_any()),
            owner_references: Some(vec![OwnerReference {
                api_version: RegisteredService::api_version(&()).to_string(),
                kind: RegisteredService::kind(&()).to_string(),
                name: service.name_any(),
                uid: service.uid().unwrap_or_default(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: format!("*/{} * * * *", check.container.minutes),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(1),
            failed_jobs_history_limit: Some(1),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    active_deadline_seconds: Some(30),
                    backoff_limit: Some(2),
                    parallelism: Some(1),
                    template: PodTemplateSpec {
                        metadata: None,
                        spec: Some(PodSpec {
                            containers: vec![container],
                            restart_policy: Some("Never".to_string()),
                            security_context: Some(PodSecurityContext {
                                run_as_user: Some(RUN_AS),
                                run_as_group: Some(RUN_AS),
                                run_as_non_root: Some(true),
                                seccomp_profile: Some(SeccompProfile {
                                    type_: "RuntimeDefault".to_string(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
