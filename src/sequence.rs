//! Ordered provisioning sequences and idempotency classification.
//!
//! A sequence is a list of described steps executed in order over one
//! session, aborting on the first failure. The canned sequences mirror the
//! Debian package operations needed to bring a bare host up to a working
//! swarm manager.

use std::time::Duration;

use crate::exec::{self, CommandError, CommandInvocation};
use crate::session::Session;

const INSTALL_STEP_TIMEOUT: Duration = Duration::from_secs(300);
const CTOP_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum Docker API version pinned for older swarm clients.
pub const DOCKER_MIN_API_VERSION: &str = "1.24";

/// A described step within a provisioning sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequenceStep {
    /// Human-readable description used in logs and error context.
    pub description: String,
    /// Command to run for this step.
    pub invocation: CommandInvocation,
}

impl SequenceStep {
    /// Creates a step from a description and command line.
    #[must_use]
    pub fn new(description: impl Into<String>, invocation: CommandInvocation) -> Self {
        Self {
            description: description.into(),
            invocation,
        }
    }
}

/// Error raised when a sequence step fails, with the step identified.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("step `{description}` failed: {source}")]
pub struct SequenceError {
    /// Description of the step that failed.
    pub description: String,
    /// Underlying command failure.
    #[source]
    pub source: CommandError,
}

/// Runs the steps in order, stopping at the first failure.
///
/// # Errors
///
/// Returns [`SequenceError`] naming the failed step.
pub async fn run_sequence(
    session: &mut dyn Session,
    steps: &[SequenceStep],
) -> Result<(), SequenceError> {
    for (index, step) in steps.iter().enumerate() {
        tracing::info!(
            step = index + 1,
            total = steps.len(),
            description = %step.description,
            "running provisioning step"
        );
        exec::run(session, &step.invocation)
            .await
            .map_err(|source| SequenceError {
                description: step.description.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Steps that install the Docker engine from the upstream apt repository.
#[must_use]
pub fn docker_install_steps() -> Vec<SequenceStep> {
    let commands: [(&str, &str); 8] = [
        ("refresh package index", "apt-get update"),
        (
            "install repository prerequisites",
            "apt-get install -y ca-certificates curl gnupg lsb-release",
        ),
        ("create keyring directory", "mkdir -p /etc/apt/keyrings"),
        (
            // `|| true` tolerates a keyring already written by a prior run.
            "fetch Docker signing key",
            "curl -fsSL https://download.docker.com/linux/debian/gpg | \
             gpg --dearmor -o /etc/apt/keyrings/docker.gpg || true",
        ),
        (
            "register Docker apt repository",
            "echo \"deb [arch=$(dpkg --print-architecture) \
             signed-by=/etc/apt/keyrings/docker.gpg] \
             https://download.docker.com/linux/debian $(lsb_release -cs) stable\" \
             > /etc/apt/sources.list.d/docker.list",
        ),
        ("refresh package index with Docker repository", "apt-get update"),
        (
            "install Docker engine",
            "apt-get install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin",
        ),
        ("enable Docker service", "systemctl enable docker"),
    ];
    timed_steps(&commands, INSTALL_STEP_TIMEOUT)
}

/// Steps that upgrade an existing Docker engine in place.
#[must_use]
pub fn docker_upgrade_steps() -> Vec<SequenceStep> {
    let commands: [(&str, &str); 2] = [
        (
            "refresh package index",
            "DEBIAN_FRONTEND=noninteractive apt-get update",
        ),
        (
            "upgrade Docker packages",
            "DEBIAN_FRONTEND=noninteractive apt-get install -y --only-upgrade \
             docker-ce docker-ce-cli containerd.io docker-compose-plugin",
        ),
    ];
    timed_steps(&commands, INSTALL_STEP_TIMEOUT)
}

/// Steps that install ctop from the azlux repository.
#[must_use]
pub fn ctop_install_steps() -> Vec<SequenceStep> {
    let commands: [(&str, &str); 4] = [
        (
            "register azlux apt repository",
            "echo \"deb http://packages.azlux.fr/debian/ stable main\" \
             | tee /etc/apt/sources.list.d/azlux.list",
        ),
        (
            "fetch azlux signing key",
            "wget -O /usr/share/keyrings/azlux-archive-keyring.gpg \
             https://azlux.fr/repo.gpg || true",
        ),
        ("refresh package index", "apt-get update"),
        ("install ctop", "apt-get install -y docker-ctop"),
    ];
    timed_steps(&commands, CTOP_STEP_TIMEOUT)
}

/// Steps that pin `DOCKER_MIN_API_VERSION` through a systemd drop-in and
/// restart the daemon so the override takes effect.
#[must_use]
pub fn api_version_override_steps() -> Vec<SequenceStep> {
    let drop_in = format!(
        "mkdir -p /etc/systemd/system/docker.service.d && \
         printf '[Service]\\nEnvironment=DOCKER_MIN_API_VERSION={DOCKER_MIN_API_VERSION}\\n' \
         > /etc/systemd/system/docker.service.d/override.conf"
    );
    let commands: [(&str, String); 3] = [
        ("write API version drop-in", drop_in),
        ("reload systemd units", String::from("systemctl daemon-reload")),
        ("restart Docker", String::from("systemctl restart docker")),
    ];
    commands
        .into_iter()
        .map(|(description, command)| {
            SequenceStep::new(
                description,
                CommandInvocation::new(command).with_timeout(INSTALL_STEP_TIMEOUT),
            )
        })
        .collect()
}

/// Command used to verify the API version override is live.
#[must_use]
pub fn api_version_check_command() -> CommandInvocation {
    CommandInvocation::new("systemctl show --property=Environment docker")
}

/// Command that initialises a swarm advertising the given address.
#[must_use]
pub fn swarm_init_command(advertise_addr: &str) -> CommandInvocation {
    CommandInvocation::new(format!("docker swarm init --advertise-addr {advertise_addr}"))
}

/// Command that creates an attachable overlay network.
#[must_use]
pub fn network_create_command(name: &str) -> CommandInvocation {
    CommandInvocation::new(format!(
        "docker network create --driver overlay --attachable {name}"
    ))
}

/// Recognised "already in the desired state" outcomes.
///
/// Docker reports these as failures with distinctive stderr text. Callers
/// treat them as success so repeated provisioning converges instead of
/// erroring.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Satisfied {
    /// The host is already part of a swarm.
    SwarmMember,
    /// A network with the requested name already exists.
    NetworkExists,
    /// A database with the requested name already exists.
    DatabaseExists,
}

impl Satisfied {
    /// Classifies stderr from a failed mutation command.
    ///
    /// Network detection requires both the "network with name" and
    /// "already exists" fragments and is checked before the bare database
    /// match, since the latter text is a substring of the former.
    #[must_use]
    pub fn classify(stderr: &str) -> Option<Self> {
        if stderr.contains("already part of a swarm") {
            Some(Self::SwarmMember)
        } else if stderr.contains("network with name") && stderr.contains("already exists") {
            Some(Self::NetworkExists)
        } else if stderr.contains("already exists") {
            Some(Self::DatabaseExists)
        } else {
            None
        }
    }
}

fn timed_steps(commands: &[(&str, &str)], timeout: Duration) -> Vec<SequenceStep> {
    commands
        .iter()
        .map(|(description, command)| {
            SequenceStep::new(
                *description,
                CommandInvocation::new(*command).with_timeout(timeout),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::ScriptedSession;

    #[tokio::test]
    async fn sequence_runs_steps_in_order() {
        let session = ScriptedSession::new();
        session.push_success();
        session.push_success();
        let mut handle = session.clone();
        let steps = vec![
            SequenceStep::new("first", CommandInvocation::new("echo one")),
            SequenceStep::new("second", CommandInvocation::new("echo two")),
        ];
        run_sequence(&mut handle, &steps).await.expect("all succeed");
        assert_eq!(
            session.executed(),
            vec![String::from("echo one"), String::from("echo two")]
        );
    }

    #[tokio::test]
    async fn sequence_aborts_on_first_failure() {
        let session = ScriptedSession::new();
        session.push_output(100, "", "E: Unable to locate package docker-ce");
        let mut handle = session.clone();
        let steps = vec![
            SequenceStep::new("install Docker engine", CommandInvocation::new("apt-get install")),
            SequenceStep::new("enable Docker service", CommandInvocation::new("systemctl enable docker")),
        ];
        let err = run_sequence(&mut handle, &steps)
            .await
            .expect_err("first step fails");
        assert_eq!(err.description, "install Docker engine");
        assert_eq!(session.executed().len(), 1);
    }

    #[test]
    fn install_steps_enable_the_service_last() {
        let steps = docker_install_steps();
        let last = steps.last().expect("steps are non-empty");
        assert_eq!(last.invocation.command, "systemctl enable docker");
    }

    #[test]
    fn upgrade_steps_are_noninteractive() {
        for step in docker_upgrade_steps() {
            assert!(step.invocation.command.starts_with("DEBIAN_FRONTEND=noninteractive"));
        }
    }

    #[test]
    fn override_steps_restart_docker() {
        let steps = api_version_override_steps();
        assert!(steps.iter().any(|step| step.invocation.command == "systemctl restart docker"));
        let drop_in = steps.first().expect("steps are non-empty");
        assert!(drop_in.invocation.command.contains("DOCKER_MIN_API_VERSION=1.24"));
    }

    #[rstest]
    #[case("Error response from daemon: This node is already part of a swarm.", Some(Satisfied::SwarmMember))]
    #[case("Error response from daemon: network with name network_swarm_public already exists", Some(Satisfied::NetworkExists))]
    #[case("ERROR:  database \"chatwoot\" already exists", Some(Satisfied::DatabaseExists))]
    #[case("Error response from daemon: could not choose an IP address", None)]
    fn satisfied_classification(#[case] stderr: &str, #[case] expected: Option<Satisfied>) {
        assert_eq!(Satisfied::classify(stderr), expected);
    }

    #[test]
    fn swarm_init_includes_advertise_addr() {
        let invocation = swarm_init_command("203.0.113.4");
        assert_eq!(
            invocation.command,
            "docker swarm init --advertise-addr 203.0.113.4"
        );
    }

    #[test]
    fn network_create_is_attachable_overlay() {
        let invocation = network_create_command("network_swarm_public");
        assert_eq!(
            invocation.command,
            "docker network create --driver overlay --attachable network_swarm_public"
        );
    }
}
