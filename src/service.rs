//! Swarm service inspection, environment updates, and restarts.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::exec::{self, CommandError, CommandInvocation};
use crate::probe::parse_name_lines;
use crate::session::Session;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(30);
const RESTART_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised while managing swarm services.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum ServiceError {
    /// The named stack has no services to operate on.
    #[error("stack `{stack}` has no services")]
    NoServices {
        /// Stack that was inspected.
        stack: String,
    },
    /// An underlying command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Outcome of restarting every service in a stack.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RestartSummary {
    /// Services that restarted successfully.
    pub restarted: Vec<String>,
    /// Services that failed, with the failure text.
    pub failed: Vec<(String, String)>,
}

impl RestartSummary {
    /// Reports whether every service restarted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lists the service names belonging to a stack.
///
/// # Errors
///
/// Returns [`CommandError`] when the listing command fails.
pub async fn stack_services(
    session: &mut dyn Session,
    stack: &str,
) -> Result<Vec<String>, CommandError> {
    let invocation = CommandInvocation::new(format!(
        "docker stack services {stack} --format '{{{{.Name}}}}'"
    ))
    .with_timeout(SERVICE_TIMEOUT);
    let result = exec::run(session, &invocation).await?;
    Ok(parse_name_lines(&result.stdout))
}

/// Reads the environment of a single service.
///
/// Inspection failures and malformed output yield an empty map, since an
/// absent environment and an uninspectable service call for the same
/// caller behaviour.
pub async fn service_env(session: &mut dyn Session, service: &str) -> BTreeMap<String, String> {
    let invocation = CommandInvocation::new(format!(
        "docker service inspect {service} --format \
         '{{{{json .Spec.TaskTemplate.ContainerSpec.Env}}}}'"
    ))
    .with_timeout(SERVICE_TIMEOUT)
    .ignoring_failure();
    match exec::run(session, &invocation).await {
        Ok(result) if result.is_success() => parse_env_json(&result.stdout),
        Ok(_) | Err(_) => BTreeMap::new(),
    }
}

/// Parses the JSON environment array emitted by `docker service inspect`.
///
/// The output is either `null` or an array of `KEY=VALUE` strings. Entries
/// without an equals sign are ignored.
#[must_use]
pub fn parse_env_json(raw: &str) -> BTreeMap<String, String> {
    let entries: Vec<String> = match serde_json::from_str(raw.trim()) {
        Ok(Some(entries)) => entries,
        Ok(None) | Err(_) => return BTreeMap::new(),
    };
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Reads the environment of a stack via its first service.
///
/// Services in one stack share their interesting variables, so the first
/// service stands in for the whole stack.
///
/// # Errors
///
/// Returns [`ServiceError::NoServices`] when the stack is empty and
/// [`ServiceError::Command`] when listing fails.
pub async fn stack_env(
    session: &mut dyn Session,
    stack: &str,
) -> Result<BTreeMap<String, String>, ServiceError> {
    let services = stack_services(session, stack).await?;
    let Some(first) = services.first() else {
        return Err(ServiceError::NoServices {
            stack: stack.to_owned(),
        });
    };
    Ok(service_env(session, first).await)
}

/// Builds the `docker service update` command applying the given variables.
#[must_use]
pub fn env_update_command(service: &str, updates: &BTreeMap<String, String>) -> String {
    let mut command = String::from("docker service update");
    for (key, value) in updates {
        let pair = format!("{key}={value}");
        command.push_str(" --env-add ");
        command.push_str(&shell_escape::escape(pair.into()).into_owned());
    }
    command.push(' ');
    command.push_str(service);
    command
}

/// Applies environment updates to every service in a stack.
///
/// One update command runs per service. The first failure aborts, since a
/// partial rollout is visible through a follow-up [`stack_env`] call.
///
/// # Errors
///
/// Returns [`ServiceError::NoServices`] when the stack is empty and
/// [`ServiceError::Command`] when an update fails.
pub async fn update_stack_env(
    session: &mut dyn Session,
    stack: &str,
    updates: &BTreeMap<String, String>,
) -> Result<usize, ServiceError> {
    let services = stack_services(session, stack).await?;
    if services.is_empty() {
        return Err(ServiceError::NoServices {
            stack: stack.to_owned(),
        });
    }
    for service in &services {
        let invocation = CommandInvocation::new(env_update_command(service, updates))
            .with_timeout(RESTART_TIMEOUT);
        exec::run(session, &invocation).await?;
    }
    Ok(services.len())
}

/// Force-restarts every service in a stack, collecting failures.
///
/// A failed restart does not stop the remaining services from being
/// attempted.
///
/// # Errors
///
/// Returns [`ServiceError::NoServices`] when the stack is empty and
/// [`ServiceError::Command`] when the listing itself fails.
pub async fn restart_stack(
    session: &mut dyn Session,
    stack: &str,
) -> Result<RestartSummary, ServiceError> {
    let services = stack_services(session, stack).await?;
    if services.is_empty() {
        return Err(ServiceError::NoServices {
            stack: stack.to_owned(),
        });
    }
    let mut summary = RestartSummary::default();
    for service in services {
        let invocation = CommandInvocation::new(format!("docker service update --force {service}"))
            .with_timeout(RESTART_TIMEOUT);
        match exec::run(session, &invocation).await {
            Ok(_) => summary.restarted.push(service),
            Err(err) => {
                tracing::warn!(service = %service, error = %err, "service restart failed");
                summary.failed.push((service, err.to_string()));
            }
        }
    }
    Ok(summary)
}
