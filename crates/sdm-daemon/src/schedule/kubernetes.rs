//! Kubernetes scheduler: runs isolated goals as Jobs cloned from the SDM's
//! own pod spec.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use sdm_core::config::KubernetesConfig;

use super::{GoalScheduler, ScheduleError, ScheduleResult};
use crate::dispatch::GoalInvocation;
use crate::env;

/// Label carrying the goal set id; pod affinity keys on it so goals of one
/// set co-locate.
const GOAL_SET_LABEL: &str = "goalSetId";

/// Shared volume holding the cloned repository for the worker container.
const HOME_VOLUME: &str = "home";

/// Mount path of the shared volume.
const HOME_MOUNT_PATH: &str = "/atm/home";

/// Errors raised by the Kubernetes API layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum K8sError {
    /// Running `kubectl` failed.
    #[error("kubectl failed: {0}")]
    Io(#[from] std::io::Error),

    /// `kubectl` exited nonzero.
    #[error("kubectl {verb} exited with {status}: {stderr}")]
    Command {
        /// The kubectl verb that failed.
        verb: &'static str,
        /// The exit status.
        status: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The API answered with JSON we cannot use.
    #[error("malformed {entity}: {message}")]
    Malformed {
        /// What was being parsed.
        entity: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// The slice of the Kubernetes API the scheduler needs.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Reads a deployment as JSON.
    async fn read_deployment(&self, name: &str, namespace: &str) -> Result<Value, K8sError>;

    /// Returns `true` if a Job with `name` exists.
    async fn job_exists(&self, name: &str, namespace: &str) -> Result<bool, K8sError>;

    /// Creates or updates the Job.
    async fn apply(&self, manifest: &Value) -> Result<(), K8sError>;

    /// Deletes and recreates the Job.
    async fn replace_force(&self, manifest: &Value) -> Result<(), K8sError>;

    /// Lists the names of succeeded Jobs whose name starts with `prefix`.
    async fn list_succeeded_jobs(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<String>, K8sError>;

    /// Deletes a Job.
    async fn delete_job(&self, name: &str, namespace: &str) -> Result<(), K8sError>;
}

/// `kubectl`-backed [`JobApi`].
pub struct Kubectl;

impl Kubectl {
    async fn run(
        verb: &'static str,
        args: &[&str],
        stdin: Option<&Value>,
    ) -> Result<String, K8sError> {
        let mut command = Command::new("kubectl");
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let Some(manifest) = stdin {
            use tokio::io::AsyncWriteExt;
            let mut handle = child.stdin.take().ok_or_else(|| K8sError::Malformed {
                entity: "kubectl stdin",
                message: "stdin not piped".to_string(),
            })?;
            handle
                .write_all(manifest.to_string().as_bytes())
                .await?;
            drop(handle);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(K8sError::Command {
                verb,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl JobApi for Kubectl {
    async fn read_deployment(&self, name: &str, namespace: &str) -> Result<Value, K8sError> {
        let stdout = Self::run(
            "get deployment",
            &["get", "deployment", name, "-n", namespace, "-o", "json"],
            None,
        )
        .await?;
        serde_json::from_str(&stdout).map_err(|e| K8sError::Malformed {
            entity: "deployment",
            message: e.to_string(),
        })
    }

    async fn job_exists(&self, name: &str, namespace: &str) -> Result<bool, K8sError> {
        let stdout = Self::run(
            "get job",
            &[
                "get",
                "job",
                name,
                "-n",
                namespace,
                "--ignore-not-found",
                "-o",
                "name",
            ],
            None,
        )
        .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn apply(&self, manifest: &Value) -> Result<(), K8sError> {
        Self::run("apply", &["apply", "-f", "-"], Some(manifest)).await?;
        Ok(())
    }

    async fn replace_force(&self, manifest: &Value) -> Result<(), K8sError> {
        Self::run("replace", &["replace", "--force", "-f", "-"], Some(manifest)).await?;
        Ok(())
    }

    async fn list_succeeded_jobs(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<String>, K8sError> {
        let stdout = Self::run(
            "get jobs",
            &["get", "jobs", "-n", namespace, "-o", "json"],
            None,
        )
        .await?;
        let listing: Value = serde_json::from_str(&stdout).map_err(|e| K8sError::Malformed {
            entity: "job list",
            message: e.to_string(),
        })?;
        let items = listing["items"].as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| {
                let name = item["metadata"]["name"].as_str()?;
                let succeeded = item["status"]["succeeded"].as_u64().unwrap_or(0);
                (name.starts_with(prefix) && succeeded > 0).then(|| name.to_string())
            })
            .collect())
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<(), K8sError> {
        Self::run(
            "delete job",
            &["delete", "job", name, "-n", namespace, "--ignore-not-found"],
            None,
        )
        .await?;
        Ok(())
    }
}

/// Inputs of the deterministic Job manifest.
#[derive(Debug, Clone)]
pub struct JobManifestParams<'a> {
    /// SDM deployment name.
    pub deployment_name: &'a str,
    /// Namespace the Job is created in.
    pub namespace: &'a str,
    /// Goal set id of the goal.
    pub goal_set_id: &'a str,
    /// Unique name of the goal.
    pub goal_unique_name: &'a str,
    /// Correlation id of the triggering event.
    pub correlation_id: &'a str,
    /// Workspace id.
    pub workspace_id: &'a str,
    /// Human-readable workspace name.
    pub workspace_name: Option<&'a str>,
}

/// Derives the Job name: `<deployment>-job-<goalSetId[..7]>-<goal-name>`,
/// lowercased and squeezed into the Kubernetes 63-character name limit.
#[must_use]
pub fn job_name(deployment: &str, goal_set_id: &str, goal_unique_name: &str) -> String {
    let set_fragment: String = goal_set_id.chars().take(7).collect();
    let goal_fragment: String = goal_unique_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut name = format!("{deployment}-job-{set_fragment}-{goal_fragment}");
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}

fn worker_env(params: &JobManifestParams<'_>, init: bool) -> Vec<Value> {
    let mut vars = vec![
        json!({"name": env::ISOLATED_GOAL, "value": "true"}),
        json!({"name": env::GOAL_SET_ID, "value": params.goal_set_id}),
        json!({"name": env::GOAL_UNIQUE_NAME, "value": params.goal_unique_name}),
        json!({"name": env::CORRELATION_ID, "value": params.correlation_id}),
        json!({"name": env::GOAL_TEAM, "value": params.workspace_id}),
    ];
    if let Some(name) = params.workspace_name {
        vars.push(json!({"name": env::GOAL_TEAM_NAME, "value": name}));
    }
    if init {
        vars.push(json!({"name": env::ISOLATED_GOAL_INIT, "value": "true"}));
    }
    vars
}

fn append_env(container: &mut Value, vars: Vec<Value>) {
    let env = container["env"].as_array().cloned().unwrap_or_default();
    let mut env = env;
    env.extend(vars);
    container["env"] = Value::Array(env);
}

fn mount_home(container: &mut Value) {
    let mut mounts = container["volumeMounts"].as_array().cloned().unwrap_or_default();
    mounts.push(json!({"name": HOME_VOLUME, "mountPath": HOME_MOUNT_PATH}));
    container["volumeMounts"] = Value::Array(mounts);
}

/// Builds the Job manifest for one isolated goal.
///
/// The manifest is a pure function of the deployment spec and the
/// parameters: the same inputs always produce the same manifest.
///
/// # Errors
///
/// Returns `K8sError::Malformed` when the deployment lacks a pod template
/// or a first container.
pub fn build_job_manifest(
    deployment: &Value,
    params: &JobManifestParams<'_>,
) -> Result<Value, K8sError> {
    let mut pod = deployment["spec"]["template"].clone();
    if pod.is_null() {
        return Err(K8sError::Malformed {
            entity: "deployment",
            message: "missing spec.template".to_string(),
        });
    }

    let name = job_name(
        params.deployment_name,
        params.goal_set_id,
        params.goal_unique_name,
    );

    let mut container = pod["spec"]["containers"]
        .as_array()
        .and_then(|c| c.first().cloned())
        .ok_or_else(|| K8sError::Malformed {
            entity: "deployment",
            message: "missing spec.template.spec.containers[0]".to_string(),
        })?;
    container["name"] = json!(name);
    append_env(&mut container, worker_env(params, false));
    mount_home(&mut container);

    // The init container clones the repository into the shared home volume
    // before the worker starts.
    let mut init_container = container.clone();
    init_container["name"] = json!(format!("{name}-init"));
    append_env(&mut init_container, vec![json!({
        "name": env::ISOLATED_GOAL_INIT,
        "value": "true",
    })]);

    pod["metadata"]["labels"][GOAL_SET_LABEL] = json!(params.goal_set_id);
    pod["spec"]["restartPolicy"] = json!("Never");
    pod["spec"]["containers"] = json!([container]);
    pod["spec"]["initContainers"] = json!([init_container]);

    let mut volumes = pod["spec"]["volumes"].as_array().cloned().unwrap_or_default();
    volumes.push(json!({"name": HOME_VOLUME, "emptyDir": {}}));
    pod["spec"]["volumes"] = Value::Array(volumes);

    pod["spec"]["affinity"] = json!({
        "podAffinity": {
            "preferredDuringSchedulingIgnoredDuringExecution": [{
                "weight": 100,
                "podAffinityTerm": {
                    "labelSelector": {
                        "matchExpressions": [{
                            "key": GOAL_SET_LABEL,
                            "operator": "In",
                            "values": [params.goal_set_id],
                        }],
                    },
                    "topologyKey": "kubernetes.io/hostname",
                },
            }],
        },
    });

    Ok(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "namespace": params.namespace,
            "labels": { GOAL_SET_LABEL: params.goal_set_id },
        },
        "spec": {
            "backoffLimit": 0,
            "template": pod,
        },
    }))
}

/// Schedules isolated goals as Kubernetes Jobs.
pub struct KubernetesGoalScheduler {
    api: Arc<dyn JobApi>,
    config: KubernetesConfig,
    workspace_id: String,
    workspace_name: Option<String>,
}

impl KubernetesGoalScheduler {
    /// Creates a scheduler over `api`.
    #[must_use]
    pub fn new(
        api: Arc<dyn JobApi>,
        config: KubernetesConfig,
        workspace_id: String,
        workspace_name: Option<String>,
    ) -> Self {
        Self {
            api,
            config,
            workspace_id,
            workspace_name,
        }
    }

    /// Resolves the deployment name, honoring the environment override.
    fn deployment_name(&self) -> Result<String, ScheduleError> {
        std::env::var(env::DEPLOYMENT_NAME)
            .ok()
            .or_else(|| self.config.deployment_name.clone())
            .ok_or_else(|| ScheduleError::Misconfigured {
                message: "no deployment name configured".to_string(),
            })
    }

    /// Resolves the namespace, honoring the environment override.
    fn namespace(&self) -> String {
        std::env::var(env::DEPLOYMENT_NAMESPACE)
            .ok()
            .unwrap_or_else(|| self.config.namespace.clone())
    }
}

#[async_trait]
impl GoalScheduler for KubernetesGoalScheduler {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn supports(&self, invocation: &GoalInvocation) -> bool {
        invocation
            .template
            .as_ref()
            .is_some_and(|template| template.isolated)
    }

    async fn schedule(
        &self,
        invocation: &GoalInvocation,
    ) -> Result<ScheduleResult, ScheduleError> {
        let deployment_name = self.deployment_name()?;
        let namespace = self.namespace();

        let deployment = self
            .api
            .read_deployment(&deployment_name, &namespace)
            .await?;
        let params = JobManifestParams {
            deployment_name: &deployment_name,
            namespace: &namespace,
            goal_set_id: &invocation.goal.goal_set_id,
            goal_unique_name: &invocation.goal.unique_name,
            correlation_id: &invocation.correlation_id,
            workspace_id: &self.workspace_id,
            workspace_name: self.workspace_name.as_deref(),
        };
        let manifest = build_job_manifest(&deployment, &params)?;
        let name = job_name(
            &deployment_name,
            &invocation.goal.goal_set_id,
            &invocation.goal.unique_name,
        );

        // Same name, same goal: replace instead of piling up duplicates.
        if self.api.job_exists(&name, &namespace).await? {
            info!(job = %name, "job exists, replacing");
            self.api.replace_force(&manifest).await?;
        } else {
            self.api.apply(&manifest).await?;
        }
        info!(
            job = %name,
            goal = %invocation.goal.unique_name,
            namespace = %namespace,
            "scheduled isolated goal"
        );

        Ok(ScheduleResult::scheduled())
    }
}

/// Periodically deletes succeeded Jobs created by this deployment.
///
/// Runs only on the master instance; worker replicas return `None`.
#[must_use]
pub fn spawn_cleanup(
    api: Arc<dyn JobApi>,
    config: &KubernetesConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.master {
        return None;
    }
    let Some(deployment_name) = config.deployment_name.clone() else {
        return None;
    };
    let namespace = config.namespace.clone();
    let interval = config.cleanup_interval;

    Some(tokio::spawn(async move {
        let prefix = format!("{deployment_name}-job-");
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race startup; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match api.list_succeeded_jobs(&namespace, &prefix).await {
                Ok(jobs) => {
                    for job in jobs {
                        debug!(job = %job, "cleaning up succeeded job");
                        if let Err(err) = api.delete_job(&job, &namespace).await {
                            warn!(job = %job, error = %err, "job cleanup failed");
                        }
                    }
                },
                Err(err) => warn!(error = %err, "listing jobs for cleanup failed"),
            }
        }
    }))
}
