//! Read-only probes that inspect the state of a remote Docker host.
//!
//! Probes never mutate the host and never propagate failures. Each one
//! issues a single command and interprets the output; a timeout or channel
//! failure is logged and reported as the absent default, so provisioning
//! steps branch on presence without inheriting probe-level errors.

use std::time::Duration;

use crate::exec::{self, CommandInvocation, CommandResult};
use crate::session::Session;

/// Timeout applied to most probe commands.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the ctop probe, which loads a TUI help screen.
pub const CTOP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a probe command, degrading any failure to `None`.
async fn observe(
    session: &mut dyn Session,
    invocation: &CommandInvocation,
) -> Option<CommandResult> {
    match exec::run(session, invocation).await {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::warn!(error = %err, "probe degraded to absent");
            None
        }
    }
}

/// Returns the Docker version string, or `None` when the engine is absent
/// or the probe fails.
pub async fn docker_version(session: &mut dyn Session) -> Option<String> {
    let invocation = CommandInvocation::new("docker --version")
        .with_timeout(PROBE_TIMEOUT)
        .ignoring_failure();
    observe(session, &invocation)
        .await
        .filter(CommandResult::is_success)
        .map(|result| result.stdout.trim().to_owned())
}

/// Reports whether the host is an active swarm node.
pub async fn swarm_active(session: &mut dyn Session) -> bool {
    let invocation =
        CommandInvocation::new("docker info --format '{{.Swarm.LocalNodeState}}'")
            .with_timeout(PROBE_TIMEOUT)
            .ignoring_failure();
    observe(session, &invocation)
        .await
        .is_some_and(|result| result.is_success() && result.stdout.trim() == "active")
}

/// Reports whether a Docker network with exactly the given name exists.
pub async fn network_exists(session: &mut dyn Session, name: &str) -> bool {
    let invocation = CommandInvocation::new(format!(
        "docker network ls --filter name=^{name}$ --format '{{{{.Name}}}}'"
    ))
    .with_timeout(PROBE_TIMEOUT)
    .ignoring_failure();
    observe(session, &invocation)
        .await
        .is_some_and(|result| result.is_success() && result.stdout.trim() == name)
}

/// Lists the names of the stacks deployed to the swarm, empty when the
/// listing fails.
pub async fn active_stacks(session: &mut dyn Session) -> Vec<String> {
    let invocation = CommandInvocation::new("docker stack ls --format '{{.Name}}'")
        .with_timeout(PROBE_TIMEOUT)
        .ignoring_failure();
    observe(session, &invocation)
        .await
        .filter(CommandResult::is_success)
        .map(|result| parse_name_lines(&result.stdout))
        .unwrap_or_default()
}

/// Reports whether a stack with the given name is deployed.
pub async fn stack_exists(session: &mut dyn Session, name: &str) -> bool {
    active_stacks(session).await.iter().any(|stack| stack == name)
}

/// Reports whether ctop is installed.
///
/// The probe runs `ctop --help` with `/usr/local/bin` appended to the path
/// and classifies the combined output, since a missing binary surfaces as
/// shell text rather than a distinctive exit status.
pub async fn ctop_installed(session: &mut dyn Session) -> bool {
    let invocation =
        CommandInvocation::new("export PATH=$PATH:/usr/local/bin; ctop --help")
            .with_timeout(CTOP_PROBE_TIMEOUT)
            .ignoring_failure();
    observe(session, &invocation).await.is_some_and(|result| {
        let combined = format!("{}\n{}", result.stdout, result.stderr);
        classify_help_output(&combined)
    })
}

/// Interprets combined help output as installed or missing.
///
/// "command not found" always means missing. A bare "not found" only counts
/// when a shell qualifier is present, so help text that merely contains the
/// phrase does not misclassify an installed binary.
#[must_use]
pub fn classify_help_output(combined: &str) -> bool {
    let lowered = combined.to_lowercase();
    if lowered.contains("command not found") {
        return false;
    }
    if lowered.contains("not found") && lowered.contains("sh:") {
        return false;
    }
    true
}

/// Splits command output into trimmed, non-empty lines.
#[must_use]
pub fn parse_name_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
