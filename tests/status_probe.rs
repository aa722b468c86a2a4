//! Behavioural tests for the composite status snapshot.

use flotilla::test_support::{ScriptedSession, ScriptedTransport};
use flotilla::{Credential, Provisioner, SessionTarget, StatusSnapshot};

fn target() -> SessionTarget {
    SessionTarget::new(
        "203.0.113.4",
        "root",
        Credential::Password(String::from("secret")),
    )
}

fn provisioner(transport: ScriptedTransport) -> Provisioner<ScriptedTransport> {
    Provisioner::new(transport, "/root", "network_swarm_public")
}

#[tokio::test]
async fn fresh_host_reports_defaults_after_one_probe() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(127, "", "bash: docker: command not found");
    transport.push_session(session.clone());

    let snapshot = provisioner(transport)
        .system_status(&target())
        .await
        .expect("status probes");
    assert_eq!(snapshot, StatusSnapshot::default());
    assert_eq!(session.executed().len(), 1);
    assert!(session.is_closed());
}

#[tokio::test]
async fn full_cluster_snapshot_is_assembled_over_one_session() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "Docker version 27.3.1, build ce12230\n", "");
    session.push_output(0, "active\n", "");
    session.push_output(0, "ctop - container metrics\nusage: ctop", "");
    session.push_output(0, "network_swarm_public\n", "");
    session.push_output(0, "traefik\nportainer\npostgres\n", "");
    transport.push_session(session.clone());

    let snapshot = provisioner(transport.clone())
        .system_status(&target())
        .await
        .expect("status probes");
    assert_eq!(
        snapshot.docker.as_deref(),
        Some("Docker version 27.3.1, build ce12230")
    );
    assert!(snapshot.swarm_active);
    assert!(snapshot.ctop);
    assert!(snapshot.network);
    assert_eq!(snapshot.stacks.len(), 3);
    // All five probes shared one session.
    assert_eq!(transport.connects().len(), 1);
}

#[tokio::test]
async fn probe_timeout_mid_snapshot_degrades_instead_of_erroring() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "Docker version 27.3.1, build ce12230\n", "");
    // swarm probe hangs past its window
    session.push_timeout(5);
    session.push_output(0, "usage: ctop [options]\n", "");
    transport.push_session(session.clone());

    let snapshot = provisioner(transport)
        .system_status(&target())
        .await
        .expect("reachable host always yields a snapshot");
    assert_eq!(
        snapshot.docker.as_deref(),
        Some("Docker version 27.3.1, build ce12230")
    );
    assert!(!snapshot.swarm_active);
    assert!(snapshot.ctop);
    assert!(!snapshot.network);
    assert!(snapshot.stacks.is_empty());
    assert!(session.is_closed());
}

#[tokio::test]
async fn snapshot_serialises_for_api_consumers() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "Docker version 27.3.1\n", "");
    session.push_output(0, "inactive\n", "");
    session.push_output(127, "", "bash: ctop: command not found");
    transport.push_session(session.clone());

    let snapshot = provisioner(transport)
        .system_status(&target())
        .await
        .expect("status probes");
    let json = serde_json::to_value(&snapshot).expect("snapshot serialises");
    assert_eq!(json["swarm_active"], serde_json::json!(false));
    assert_eq!(json["ctop"], serde_json::json!(false));
    assert_eq!(json["stacks"], serde_json::json!([]));
}
