use super::Session;
use crate::{error::join, Result};
use ahash::AHashMap as HashMap;
use std::{collections::BTreeSet, future::Future, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

/// The sessions of one environment, keyed by namespace.
type Sessions = HashMap<String, Session>;

/// The live sessions of one kind of namespace, by environment.
///
/// Each environment's sessions have their own lock, held while sessions are
/// started, so a remote that is slow to sync only delays its own environment.
#[derive(Debug, Default)]
pub struct Registry {
    environments: Mutex<HashMap<String, Arc<Mutex<Sessions>>>>,
}

/// The registries for service and application namespaces.
#[derive(Debug, Default)]
pub struct Watches {
    pub services: Registry,
    pub applications: Registry,
}

fn session_key(environment: &str, namespace: &str) -> String {
    format!("{environment}/{namespace}")
}

impl Registry {
    async fn sessions(&self, environment: &str) -> Arc<Mutex<Sessions>> {
        self.environments
            .lock()
            .await
            .entry(environment.to_string())
            .or_default()
            .clone()
    }

    /// Makes the sessions of `environment` match `namespaces`.
    ///
    /// Sessions for namespaces that are no longer listed are stopped, and
    /// sessions are started for new namespaces. Running sessions for listed
    /// namespaces are left alone; sessions whose watch has ended are
    /// replaced.
    pub async fn sync<F, Fut>(&self, environment: &str, namespaces: &[String], start: F) -> Result<()>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let wanted = namespaces.iter().map(String::as_str).collect::<BTreeSet<_>>();
        let sessions = self.sessions(environment).await;
        let mut sessions = sessions.lock().await;
        sessions.retain(|ns, session| {
            if wanted.contains(ns.as_str()) && !session.is_finished() {
                return true;
            }
            session.stop();
            info!(key = %session_key(environment, ns), "Stopped watch");
            false
        });

        let mut errors = vec![];
        for ns in namespaces {
            if sessions.contains_key(ns) {
                continue;
            }
            match start(ns.clone()).await {
                Ok(session) => {
                    info!(key = %session_key(environment, ns), "Started watch");
                    sessions.insert(ns.clone(), session);
                }
                Err(error) => errors.push(error),
            }
        }
        join(errors)
    }

    /// Stops every session of `environment`.
    pub async fn stop_all(&self, environment: &str) {
        let sessions = self.sessions(environment).await;
        let mut sessions = sessions.lock().await;
        for (ns, session) in sessions.drain() {
            session.stop();
            info!(key = %session_key(environment, &ns), "Stopped watch");
        }
    }

    /// The `<environment>/<namespace>` keys of the running sessions, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let environments = self
            .environments
            .lock()
            .await
            .iter()
            .map(|(env, sessions)| (env.clone(), sessions.clone()))
            .collect::<Vec<_>>();
        let mut keys = vec![];
        for (env, sessions) in environments {
            keys.extend(sessions.lock().await.keys().map(|ns| session_key(&env, ns)));
        }
        keys.sort();
        keys
    }
}

impl Watches {
    pub async fn stop_all(&self, environment: &str) {
        self.services.stop_all(environment).await;
        self.applications.stop_all(environment).await;
    }
}
