//! Behavioural tests for host provisioning through the orchestrator.

use std::time::Duration;

use flotilla::test_support::{ScriptedSession, ScriptedTransport};
use flotilla::{
    Credential, OperationRegistry, OperationState, ProvisionOutcome, Provisioner, SessionTarget,
};

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
async fn bare_host_is_provisioned_end_to_end() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    // docker probe: absent
    session.push_output(127, "", "bash: docker: command not found");
    // eight install steps
    for _ in 0..8 {
        session.push_success();
    }
    // three API override steps, then the env check
    for _ in 0..3 {
        session.push_success();
    }
    session.push_output(0, "Environment=DOCKER_MIN_API_VERSION=1.24\n", "");
    // swarm probe: inactive, then init
    session.push_output(0, "inactive\n", "");
    session.push_success();
    // network probe: missing, then create
    session.push_output(0, "", "");
    session.push_success();
    transport.push_session(session.clone());

    provisioner(transport)
        .provision(&target(), "203.0.113.4")
        .await
        .expect("provision succeeds");

    let executed = session.executed();
    assert!(
        executed
            .iter()
            .any(|cmd| cmd == "docker swarm init --advertise-addr 203.0.113.4")
    );
    assert!(
        executed
            .iter()
            .any(|cmd| cmd
                == "docker network create --driver overlay --attachable network_swarm_public")
    );
    assert!(session.is_closed());
}

#[tokio::test]
async fn provisioned_host_converges_without_mutations() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    // docker probe: present, so the install sequence is skipped entirely
    session.push_output(0, "Docker version 27.3.1\n", "");
    // API override still reapplies and verifies
    for _ in 0..3 {
        session.push_success();
    }
    session.push_output(0, "Environment=DOCKER_MIN_API_VERSION=1.24\n", "");
    // swarm probe: active
    session.push_output(0, "active\n", "");
    // network probe: present
    session.push_output(0, "network_swarm_public\n", "");
    transport.push_session(session.clone());

    provisioner(transport)
        .provision(&target(), "203.0.113.4")
        .await
        .expect("provision converges");

    let executed = session.executed();
    assert!(!executed.iter().any(|cmd| cmd.contains("apt-get install")));
    assert!(!executed.iter().any(|cmd| cmd.contains("swarm init")));
    assert!(!executed.iter().any(|cmd| cmd.contains("network create")));
}

#[tokio::test]
async fn ctop_install_is_skipped_when_probe_finds_it() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "ctop - container metrics\nusage: ctop [options]", "");
    transport.push_session(session.clone());

    let outcome = provisioner(transport)
        .install_ctop(&target())
        .await
        .expect("probe works");
    assert_eq!(outcome, ProvisionOutcome::AlreadySatisfied);
    assert_eq!(session.executed().len(), 1);
}

#[tokio::test]
async fn ctop_install_runs_when_missing() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(127, "", "sh: 1: ctop: not found");
    for _ in 0..4 {
        session.push_success();
    }
    transport.push_session(session.clone());

    let outcome = provisioner(transport)
        .install_ctop(&target())
        .await
        .expect("install succeeds");
    assert_eq!(outcome, ProvisionOutcome::Applied);
    assert!(
        session
            .executed()
            .iter()
            .any(|cmd| cmd.contains("apt-get install -y docker-ctop"))
    );
}

#[tokio::test]
async fn upgrade_runs_both_steps_in_order() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_success();
    session.push_success();
    transport.push_session(session.clone());

    provisioner(transport)
        .upgrade_docker(&target())
        .await
        .expect("upgrade succeeds");
    let executed = session.executed();
    assert_eq!(executed.len(), 2);
    assert!(
        executed
            .last()
            .is_some_and(|cmd| cmd.contains("--only-upgrade"))
    );
}

async fn settled_status(
    registry: &OperationRegistry,
    key: &str,
) -> flotilla::OperationStatus {
    for _ in 0..50 {
        if registry.status(key).state != OperationState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    registry.status(key)
}

#[tokio::test]
async fn background_provision_reports_through_the_registry() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    // docker present, override reapplies, swarm and network already hold
    session.push_output(0, "Docker version 27.3.1\n", "");
    for _ in 0..3 {
        session.push_success();
    }
    session.push_output(0, "Environment=DOCKER_MIN_API_VERSION=1.24\n", "");
    session.push_output(0, "active\n", "");
    session.push_output(0, "network_swarm_public\n", "");
    transport.push_session(session.clone());

    let registry = OperationRegistry::new();
    let worker = provisioner(transport);
    let host = target();
    registry
        .spawn("provision", async move {
            worker
                .provision(&host, "203.0.113.4")
                .await
                .map(|()| String::from("host provisioned"))
        })
        .expect("spawn accepted");
    assert_eq!(registry.status("provision").state, OperationState::Running);

    let status = settled_status(&registry, "provision").await;
    assert_eq!(status.state, OperationState::Success);
    assert_eq!(status.message.as_deref(), Some("host provisioned"));
    assert!(session.is_closed());
}

#[tokio::test]
async fn background_failure_lands_in_the_registry_not_the_caller() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(127, "", "bash: docker: command not found");
    session.push_output(100, "", "E: repository unreachable");
    transport.push_session(session.clone());

    let registry = OperationRegistry::new();
    let worker = provisioner(transport);
    let host = target();
    registry
        .spawn("provision", async move {
            worker
                .provision(&host, "203.0.113.4")
                .await
                .map(|()| String::from("host provisioned"))
        })
        .expect("spawn accepted");

    let status = settled_status(&registry, "provision").await;
    assert_eq!(status.state, OperationState::Error);
    assert!(
        status
            .message
            .is_some_and(|message| message.contains("repository unreachable"))
    );
    assert!(session.is_closed());
}

#[tokio::test]
async fn each_operation_uses_its_own_session() {
    let transport = ScriptedTransport::new();
    let first = ScriptedSession::new();
    first.push_output(0, "Docker version 27.3.1\n", "");
    let second = ScriptedSession::new();
    second.push_output(0, "active\n", "");
    transport.push_session(first.clone());
    transport.push_session(second.clone());

    let provisioner = provisioner(transport.clone());
    provisioner
        .docker_version(&target())
        .await
        .expect("first op");
    provisioner
        .init_swarm(&target(), "203.0.113.4")
        .await
        .expect("second op");

    assert_eq!(transport.connects().len(), 2);
    assert!(first.is_closed());
    assert!(second.is_closed());
}
