//! Composite host status gathered over a single session.

use serde::Serialize;

use crate::probe;
use crate::session::Session;

/// Snapshot of everything the probes can observe on a host.
///
/// Fields default to the values reported for a host without Docker, so a
/// short-circuited probe run still yields a complete snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Docker version string, absent when the engine is not installed.
    pub docker: Option<String>,
    /// Whether the host is an active swarm node.
    pub swarm_active: bool,
    /// Whether the configured overlay network exists.
    pub network: bool,
    /// Whether ctop is installed.
    pub ctop: bool,
    /// Names of the deployed stacks.
    pub stacks: Vec<String>,
}

/// Probes the host in dependency order and assembles a snapshot.
///
/// Without Docker nothing else can hold, so the remaining probes are
/// skipped. The ctop probe is independent of swarm state; the network and
/// stack probes only run on an active swarm node. Probes degrade rather
/// than fail, so the snapshot is always complete.
pub async fn probe_status(session: &mut dyn Session, network_name: &str) -> StatusSnapshot {
    let docker = probe::docker_version(session).await;
    if docker.is_none() {
        return StatusSnapshot::default();
    }

    let swarm_active = probe::swarm_active(session).await;
    let ctop = probe::ctop_installed(session).await;

    let (network, stacks) = if swarm_active {
        (
            probe::network_exists(session, network_name).await,
            probe::active_stacks(session).await,
        )
    } else {
        (false, Vec::new())
    };

    StatusSnapshot {
        docker,
        swarm_active,
        network,
        ctop,
        stacks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;

    #[tokio::test]
    async fn missing_docker_short_circuits() {
        let session = ScriptedSession::new();
        session.push_output(127, "", "bash: docker: command not found");
        let mut handle = session.clone();
        let snapshot = probe_status(&mut handle, "network_swarm_public").await;
        assert_eq!(snapshot, StatusSnapshot::default());
        assert_eq!(session.executed().len(), 1);
    }

    #[tokio::test]
    async fn inactive_swarm_skips_network_and_stacks() {
        let session = ScriptedSession::new();
        session.push_output(0, "Docker version 27.3.1\n", "");
        session.push_output(0, "inactive\n", "");
        session.push_output(0, "usage: ctop [options]\n", "");
        let mut handle = session.clone();
        let snapshot = probe_status(&mut handle, "network_swarm_public").await;
        assert!(snapshot.docker.is_some());
        assert!(!snapshot.swarm_active);
        assert!(snapshot.ctop);
        assert!(!snapshot.network);
        assert!(snapshot.stacks.is_empty());
        assert_eq!(session.executed().len(), 3);
    }

    #[tokio::test]
    async fn active_swarm_probes_everything() {
        let session = ScriptedSession::new();
        session.push_output(0, "Docker version 27.3.1\n", "");
        session.push_output(0, "active\n", "");
        session.push_output(127, "", "bash: ctop: command not found");
        session.push_output(0, "network_swarm_public\n", "");
        session.push_output(0, "traefik\nportainer\n", "");
        let mut handle = session.clone();
        let snapshot = probe_status(&mut handle, "network_swarm_public").await;
        assert!(snapshot.swarm_active);
        assert!(!snapshot.ctop);
        assert!(snapshot.network);
        assert_eq!(
            snapshot.stacks,
            vec![String::from("traefik"), String::from("portainer")]
        );
    }

    #[tokio::test]
    async fn mid_run_timeout_still_yields_a_complete_snapshot() {
        let session = ScriptedSession::new();
        session.push_output(0, "Docker version 27.3.1\n", "");
        session.push_timeout(5);
        session.push_output(0, "usage: ctop [options]\n", "");
        let mut handle = session.clone();
        let snapshot = probe_status(&mut handle, "network_swarm_public").await;
        assert_eq!(snapshot.docker.as_deref(), Some("Docker version 27.3.1"));
        assert!(!snapshot.swarm_active);
        assert!(snapshot.ctop);
        assert!(!snapshot.network);
        assert!(snapshot.stacks.is_empty());
    }
}
