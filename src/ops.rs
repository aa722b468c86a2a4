//! High-level operations: one session per operation, probes before
//! mutations, guaranteed session close.
//!
//! Every method connects, does its work, and closes the session whether
//! the work succeeded or not. Mutating operations probe first and report
//! [`ProvisionOutcome::AlreadySatisfied`] instead of redoing work, so a
//! retried request converges rather than failing.

use std::collections::BTreeMap;

use crate::exec::{self, CommandError};
use crate::portainer::{self, PortainerAuth, PortainerError};
use crate::probe;
use crate::sequence::{
    DOCKER_MIN_API_VERSION, Satisfied, SequenceError, api_version_check_command,
    api_version_override_steps, ctop_install_steps, docker_install_steps, docker_upgrade_steps,
    network_create_command, run_sequence, swarm_init_command,
};
use crate::service::{self, RestartSummary, ServiceError};
use crate::session::{ConnectError, Session, SessionTarget, Transport};
use crate::stack::{self, DeployError, DeployPlan};
use crate::status::{self, StatusSnapshot};

/// Result of a mutating operation that may find its work already done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionOutcome {
    /// The desired state already held; nothing was changed.
    AlreadySatisfied,
    /// The operation ran and changed the host.
    Applied,
}

/// Errors raised by high-level operations.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum OpError {
    /// Establishing the session failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// A remote command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// A provisioning sequence failed partway through.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// A stack deployment failed.
    #[error(transparent)]
    Deploy(#[from] DeployError),
    /// A service operation failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// A Portainer API interaction failed.
    #[error(transparent)]
    Portainer(#[from] PortainerError),
    /// A post-condition check failed after the mutation ran.
    #[error("verification failed: {message}")]
    Verification {
        /// What the check expected and did not find.
        message: String,
    },
}

/// Orchestrator owning the transport and per-host defaults.
///
/// Generic over the transport so tests drive it with scripted sessions.
#[derive(Clone, Debug)]
pub struct Provisioner<T: Transport> {
    transport: T,
    remote_stack_dir: String,
    network_name: String,
}

impl<T: Transport> Provisioner<T> {
    /// Creates a provisioner with the given transport and defaults.
    #[must_use]
    pub fn new(
        transport: T,
        remote_stack_dir: impl Into<String>,
        network_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            remote_stack_dir: remote_stack_dir.into(),
            network_name: network_name.into(),
        }
    }

    /// Overlay network name stacks attach to.
    #[must_use]
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    async fn open(&self, target: &SessionTarget) -> Result<T::Session, ConnectError> {
        self.transport.connect(target).await
    }

    /// Checks that a session can be established and closed.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Connect`] when the host rejects the session.
    pub async fn verify_connection(&self, target: &SessionTarget) -> Result<(), OpError> {
        let mut session = self.open(target).await?;
        session.close().await;
        Ok(())
    }

    /// Reads the Docker version, `None` when the engine is absent.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Connect`] when the session cannot be established.
    pub async fn docker_version(
        &self,
        target: &SessionTarget,
    ) -> Result<Option<String>, OpError> {
        let mut session = self.open(target).await?;
        let outcome = probe::docker_version(&mut session).await;
        session.close().await;
        Ok(outcome)
    }

    /// Installs the Docker engine unless it is already present, pinning
    /// the minimum API version after a fresh install.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or install failure.
    pub async fn install_docker(
        &self,
        target: &SessionTarget,
    ) -> Result<ProvisionOutcome, OpError> {
        let mut session = self.open(target).await?;
        let outcome = install_docker_inner(&mut session).await;
        session.close().await;
        outcome
    }

    /// Upgrades Docker packages in place.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or upgrade failure.
    pub async fn upgrade_docker(&self, target: &SessionTarget) -> Result<(), OpError> {
        let mut session = self.open(target).await?;
        let outcome = run_sequence(&mut session, &docker_upgrade_steps()).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Installs ctop unless it is already present.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or install failure.
    pub async fn install_ctop(
        &self,
        target: &SessionTarget,
    ) -> Result<ProvisionOutcome, OpError> {
        let mut session = self.open(target).await?;
        let outcome = install_ctop_inner(&mut session).await;
        session.close().await;
        outcome
    }

    /// Pins the minimum Docker API version and verifies the daemon picked
    /// it up.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Verification`] when the restarted daemon does
    /// not show the pinned version, and other [`OpError`] variants on
    /// connect or command failure.
    pub async fn apply_api_version_override(
        &self,
        target: &SessionTarget,
    ) -> Result<(), OpError> {
        let mut session = self.open(target).await?;
        let outcome = apply_api_override_inner(&mut session).await;
        session.close().await;
        outcome
    }

    /// Initialises a swarm advertising the given address.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or init failure. A host that is
    /// already a swarm member reports success.
    pub async fn init_swarm(
        &self,
        target: &SessionTarget,
        advertise_addr: &str,
    ) -> Result<ProvisionOutcome, OpError> {
        let mut session = self.open(target).await?;
        let outcome = init_swarm_inner(&mut session, advertise_addr).await;
        session.close().await;
        outcome
    }

    /// Creates the overlay network stacks attach to.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or creation failure. An existing
    /// network reports success.
    pub async fn create_network(
        &self,
        target: &SessionTarget,
    ) -> Result<ProvisionOutcome, OpError> {
        let mut session = self.open(target).await?;
        let outcome = create_network_inner(&mut session, &self.network_name).await;
        session.close().await;
        outcome
    }

    /// Full bootstrap: engine, API pin, swarm, overlay network.
    ///
    /// # Errors
    ///
    /// Returns the first [`OpError`] encountered.
    pub async fn provision(
        &self,
        target: &SessionTarget,
        advertise_addr: &str,
    ) -> Result<(), OpError> {
        let mut session = self.open(target).await?;
        let outcome = async {
            if install_docker_inner(&mut session).await? == ProvisionOutcome::AlreadySatisfied {
                apply_api_override_inner(&mut session).await?;
            }
            init_swarm_inner(&mut session, advertise_addr).await?;
            create_network_inner(&mut session, &self.network_name).await?;
            Ok(())
        }
        .await;
        session.close().await;
        outcome
    }

    /// Gathers the composite status snapshot.
    ///
    /// Probes degrade rather than fail, so a reachable host always yields
    /// a complete snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Connect`] when the session cannot be established.
    pub async fn system_status(&self, target: &SessionTarget) -> Result<StatusSnapshot, OpError> {
        let mut session = self.open(target).await?;
        let outcome = status::probe_status(&mut session, &self.network_name).await;
        session.close().await;
        Ok(outcome)
    }

    /// Lists the deployed stacks.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Connect`] when the session cannot be established.
    pub async fn active_stacks(&self, target: &SessionTarget) -> Result<Vec<String>, OpError> {
        let mut session = self.open(target).await?;
        let outcome = probe::active_stacks(&mut session).await;
        session.close().await;
        Ok(outcome)
    }

    /// Reports whether a named stack is deployed.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::Connect`] when the session cannot be established.
    pub async fn stack_exists(
        &self,
        target: &SessionTarget,
        name: &str,
    ) -> Result<bool, OpError> {
        let mut session = self.open(target).await?;
        let outcome = probe::stack_exists(&mut session, name).await;
        session.close().await;
        Ok(outcome)
    }

    /// Executes a deploy plan over one session.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when a database precondition or deploy fails.
    pub async fn deploy(&self, target: &SessionTarget, plan: &DeployPlan) -> Result<(), OpError> {
        let mut session = self.open(target).await?;
        let outcome = stack::execute_plan(&mut session, &self.remote_stack_dir, plan).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Deploys a stack through the host's local Portainer API.
    ///
    /// Returns `true` when the stack was created, `false` when Portainer
    /// already had it.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or Portainer failure.
    pub async fn deploy_via_portainer(
        &self,
        target: &SessionTarget,
        auth: &PortainerAuth,
        stack_name: &str,
        stack_content: &str,
    ) -> Result<bool, OpError> {
        let mut session = self.open(target).await?;
        let outcome =
            portainer::deploy_stack(&mut session, auth, stack_name, stack_content).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Reads a stack's environment via its first service.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or service failure.
    pub async fn stack_env(
        &self,
        target: &SessionTarget,
        stack: &str,
    ) -> Result<BTreeMap<String, String>, OpError> {
        let mut session = self.open(target).await?;
        let outcome = service::stack_env(&mut session, stack).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Applies environment updates to every service in a stack, returning
    /// the number of services updated.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect or update failure.
    pub async fn update_stack_env(
        &self,
        target: &SessionTarget,
        stack: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<usize, OpError> {
        let mut session = self.open(target).await?;
        let outcome = service::update_stack_env(&mut session, stack, updates).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Force-restarts every service in a stack.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] on connect failure or when the service listing
    /// fails.
    pub async fn restart_stack(
        &self,
        target: &SessionTarget,
        stack: &str,
    ) -> Result<RestartSummary, OpError> {
        let mut session = self.open(target).await?;
        let outcome = service::restart_stack(&mut session, stack).await;
        session.close().await;
        Ok(outcome?)
    }
}

async fn install_docker_inner(session: &mut dyn Session) -> Result<ProvisionOutcome, OpError> {
    if probe::docker_version(session).await.is_some() {
        tracing::info!("docker already installed, skipping");
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    run_sequence(session, &docker_install_steps()).await?;
    apply_api_override_inner(session).await?;
    Ok(ProvisionOutcome::Applied)
}

async fn install_ctop_inner(session: &mut dyn Session) -> Result<ProvisionOutcome, OpError> {
    if probe::ctop_installed(session).await {
        tracing::info!("ctop already installed, skipping");
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    run_sequence(session, &ctop_install_steps()).await?;
    Ok(ProvisionOutcome::Applied)
}

async fn apply_api_override_inner(session: &mut dyn Session) -> Result<(), OpError> {
    run_sequence(session, &api_version_override_steps()).await?;
    let check = exec::run(session, &api_version_check_command()).await?;
    let expected = format!("DOCKER_MIN_API_VERSION={DOCKER_MIN_API_VERSION}");
    if check.stdout.contains(&expected) {
        Ok(())
    } else {
        Err(OpError::Verification {
            message: format!("docker environment does not contain {expected}"),
        })
    }
}

async fn init_swarm_inner(
    session: &mut dyn Session,
    advertise_addr: &str,
) -> Result<ProvisionOutcome, OpError> {
    if probe::swarm_active(session).await {
        tracing::info!("swarm already active, skipping init");
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    let invocation = swarm_init_command(advertise_addr).ignoring_failure();
    let result = exec::run(session, &invocation).await?;
    if result.is_success() {
        return Ok(ProvisionOutcome::Applied);
    }
    if Satisfied::classify(&result.stderr) == Some(Satisfied::SwarmMember) {
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    Err(OpError::Command(CommandError::Failed {
        command: invocation.command,
        exit_code: result.exit_code,
        stderr: result.stderr,
    }))
}

async fn create_network_inner(
    session: &mut dyn Session,
    name: &str,
) -> Result<ProvisionOutcome, OpError> {
    if probe::network_exists(session, name).await {
        tracing::info!(network = name, "network already exists, skipping");
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    let invocation = network_create_command(name).ignoring_failure();
    let result = exec::run(session, &invocation).await?;
    if result.is_success() {
        return Ok(ProvisionOutcome::Applied);
    }
    if Satisfied::classify(&result.stderr) == Some(Satisfied::NetworkExists) {
        return Ok(ProvisionOutcome::AlreadySatisfied);
    }
    Err(OpError::Command(CommandError::Failed {
        command: invocation.command,
        exit_code: result.exit_code,
        stderr: result.stderr,
    }))
}
