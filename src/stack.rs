//! Stack templating and the deploy pipeline.
//!
//! Templates carry literal placeholder tokens that are substituted verbatim
//! before upload. A deploy plan groups database preconditions, the stacks to
//! deploy, and best-effort post-deploy container commands; databases and
//! stacks are fatal on failure, post steps are not.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::exec::{self, CommandError, CommandInvocation};
use crate::sequence::Satisfied;
use crate::session::{Session, TransferError};

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);
const DATABASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Substitutes placeholder tokens in a template.
///
/// Keys are the full literal tokens as they appear in the template, braces
/// included. Unmatched tokens are left in place.
#[must_use]
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut rendered = template.to_owned();
    for (token, value) in values {
        rendered = rendered.replace(token.as_str(), value);
    }
    rendered
}

/// A stack ready for upload, with its name and rendered compose content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedStack {
    /// Stack name used for the remote filename and `docker stack deploy`.
    pub name: String,
    /// Rendered compose file content.
    pub content: String,
}

impl RenderedStack {
    /// Renders a template into a named stack.
    #[must_use]
    pub fn new(name: impl Into<String>, template: &str, values: &BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            content: render(template, values),
        }
    }
}

/// A command run inside a container located by a name filter, polled until
/// the container appears.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerExec {
    /// Docker `ps` name filter locating the container.
    pub container_filter: String,
    /// Command executed with `docker exec` once the container is found.
    pub command: String,
    /// Number of polling attempts before giving up.
    pub attempts: u32,
    /// Delay between polling attempts.
    pub interval: Duration,
}

/// An ordered deployment of databases, stacks, and post-deploy commands.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeployPlan {
    /// Postgres databases that must exist before the stacks start.
    pub databases: Vec<String>,
    /// Stacks deployed in order.
    pub stacks: Vec<RenderedStack>,
    /// Best-effort commands run after the stacks are up.
    pub post: Vec<ContainerExec>,
}

/// Errors raised while executing a deploy plan.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum DeployError {
    /// A database or deploy command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Uploading a rendered stack file failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Builds the remote path for a stack's compose file.
#[must_use]
pub fn remote_stack_path(remote_dir: &str, stack_name: &str) -> String {
    format!("{}/{stack_name}.yml", remote_dir.trim_end_matches('/'))
}

/// Uploads a rendered stack and deploys it.
///
/// # Errors
///
/// Returns [`DeployError`] when the upload or the deploy command fails.
pub async fn deploy_stack(
    session: &mut dyn Session,
    remote_dir: &str,
    stack: &RenderedStack,
) -> Result<(), DeployError> {
    let path = remote_stack_path(remote_dir, &stack.name);
    tracing::info!(stack = %stack.name, path = %path, "deploying stack");
    session.upload(&path, &stack.content).await?;
    let invocation = CommandInvocation::new(format!(
        "docker stack deploy -c {path} {}",
        stack.name
    ))
    .with_timeout(DEPLOY_TIMEOUT);
    exec::run(session, &invocation).await?;
    Ok(())
}

/// Ensures a Postgres database exists in the `postgres` stack container.
///
/// When no postgres container is running the step is skipped with a
/// warning, matching the behaviour of a host where the database stack has
/// not been deployed yet. An "already exists" failure counts as success.
///
/// # Errors
///
/// Returns [`CommandError`] when creation fails for any other reason.
pub async fn ensure_database(
    session: &mut dyn Session,
    database: &str,
) -> Result<(), CommandError> {
    let find = CommandInvocation::new("docker ps -q -f name=postgres_postgres | head -n 1")
        .with_timeout(DATABASE_TIMEOUT)
        .ignoring_failure();
    let found = exec::run(session, &find).await?;
    let container = found.stdout.trim().to_owned();
    if container.is_empty() {
        tracing::warn!(database, "no postgres container running, skipping database creation");
        return Ok(());
    }

    // Existence check errors are ignored; creation is the authoritative step.
    let check = CommandInvocation::new(format!(
        "docker exec {container} psql -U postgres -tAc \
         \"SELECT 1 FROM pg_database WHERE datname='{database}'\""
    ))
    .with_timeout(DATABASE_TIMEOUT)
    .ignoring_failure();
    let existing = exec::run(session, &check).await?;
    if existing.is_success() && existing.stdout.trim() == "1" {
        tracing::info!(database, "database already present");
        return Ok(());
    }

    let create = CommandInvocation::new(format!(
        "docker exec {container} psql -U postgres -c \"CREATE DATABASE {database};\""
    ))
    .with_timeout(DATABASE_TIMEOUT)
    .ignoring_failure();
    let created = exec::run(session, &create).await?;
    if created.is_success() || Satisfied::classify(&created.stderr).is_some() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            command: create.command,
            exit_code: created.exit_code,
            stderr: created.stderr,
        })
    }
}

/// Runs a post-deploy container command, polling for the container first.
///
/// Failures are logged and swallowed. The deployment itself has already
/// succeeded by the time post steps run.
pub async fn run_post_step(session: &mut dyn Session, step: &ContainerExec) {
    let find = CommandInvocation::new(format!(
        "docker ps -q -f name={} | head -n 1",
        step.container_filter
    ))
    .ignoring_failure();

    let mut container = String::new();
    for attempt in 1..=step.attempts {
        match exec::run(session, &find).await {
            Ok(result) => {
                let id = result.stdout.trim().to_owned();
                if !id.is_empty() {
                    container = id;
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(filter = %step.container_filter, error = %err, "container poll failed");
            }
        }
        if attempt < step.attempts {
            tokio::time::sleep(step.interval).await;
        }
    }

    if container.is_empty() {
        tracing::warn!(
            filter = %step.container_filter,
            "container never appeared, skipping post-deploy command"
        );
        return;
    }

    let invocation = CommandInvocation::new(format!("docker exec {container} {}", step.command))
        .with_timeout(DEPLOY_TIMEOUT)
        .ignoring_failure();
    match exec::run(session, &invocation).await {
        Ok(result) if result.is_success() => {
            tracing::info!(filter = %step.container_filter, "post-deploy command completed");
        }
        Ok(result) => {
            tracing::warn!(
                filter = %step.container_filter,
                exit_code = result.exit_code,
                "post-deploy command failed"
            );
        }
        Err(err) => {
            tracing::warn!(filter = %step.container_filter, error = %err, "post-deploy command failed");
        }
    }
}

/// Executes a plan: databases, then stacks, then best-effort post steps.
///
/// # Errors
///
/// Returns [`DeployError`] when a database precondition or stack deploy
/// fails. Post-step failures are logged, never returned.
pub async fn execute_plan(
    session: &mut dyn Session,
    remote_dir: &str,
    plan: &DeployPlan,
) -> Result<(), DeployError> {
    for database in &plan.databases {
        ensure_database(session, database).await?;
    }
    for stack in &plan.stacks {
        deploy_stack(session, remote_dir, stack).await?;
    }
    for step in &plan.post {
        run_post_step(session, step).await;
    }
    Ok(())
}
