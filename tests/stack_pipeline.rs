//! Behavioural tests for the stack deployment pipeline.

use flotilla::test_support::{ScriptedSession, ScriptedTransport};
use flotilla::{ChatwootInputs, Credential, Provisioner, SessionTarget, apps};

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
async fn traefik_deploy_uploads_rendered_template() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_success();
    transport.push_session(session.clone());

    let plan = apps::traefik_plan("ops@example.com");
    provisioner(transport)
        .deploy(&target(), &plan)
        .await
        .expect("deploy succeeds");

    let uploads = session.uploads();
    let (path, content) = uploads.first().expect("one upload");
    assert_eq!(path, "/root/traefik.yml");
    assert!(content.contains("acme.email=ops@example.com"));
    assert_eq!(
        session.executed(),
        vec![String::from("docker stack deploy -c /root/traefik.yml traefik")]
    );
    assert!(session.is_closed());
}

#[tokio::test]
async fn chatwoot_deploy_orders_database_stacks_and_migration() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    // database precondition: find container, existing database
    session.push_output(0, "abc123\n", "");
    session.push_output(0, "1\n", "");
    // two stack deploys
    session.push_success();
    session.push_success();
    // post step: container appears on the first poll, migration runs
    session.push_output(0, "def456\n", "");
    session.push_success();
    transport.push_session(session.clone());

    let plan = apps::chatwoot_plan(&ChatwootInputs {
        postgres_password: String::from("pgpass"),
        minio_user: String::from("minio"),
        minio_password: String::from("miniopass"),
        minio_public_url: String::from("https://s3.example.com"),
        chatwoot_url: String::from("https://chat.example.com"),
    });
    provisioner(transport)
        .deploy(&target(), &plan)
        .await
        .expect("deploy succeeds");

    let uploads = session.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(
        uploads
            .first()
            .is_some_and(|(path, _)| path == "/root/chatwoot_admin.yml")
    );
    assert!(
        uploads
            .get(1)
            .is_some_and(|(path, _)| path == "/root/chatwoot_sidekiq.yml")
    );

    let executed = session.executed();
    assert!(
        executed
            .first()
            .is_some_and(|cmd| cmd.contains("docker ps -q -f name=postgres_postgres"))
    );
    assert!(
        executed
            .last()
            .is_some_and(|cmd| cmd == "docker exec def456 bundle exec rails db:chatwoot_prepare")
    );
}

#[tokio::test]
async fn failed_migration_does_not_fail_the_deploy() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "abc123\n", "");
    session.push_output(0, "1\n", "");
    session.push_success();
    session.push_success();
    // container found, migration fails
    session.push_output(0, "def456\n", "");
    session.push_output(1, "", "rails aborted!");
    transport.push_session(session.clone());

    let plan = apps::chatwoot_plan(&ChatwootInputs {
        postgres_password: String::from("pgpass"),
        minio_user: String::from("minio"),
        minio_password: String::from("miniopass"),
        minio_public_url: String::from("https://s3.example.com"),
        chatwoot_url: String::from("https://chat.example.com"),
    });
    provisioner(transport)
        .deploy(&target(), &plan)
        .await
        .expect("migration failure is swallowed");
}

#[tokio::test]
async fn n8n_deploy_creates_database_and_three_stacks() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    // database precondition: container found, database missing, created
    session.push_output(0, "abc123\n", "");
    session.push_output(0, "\n", "");
    session.push_success();
    // three stack deploys
    session.push_success();
    session.push_success();
    session.push_success();
    transport.push_session(session.clone());

    let plan = apps::n8n_plan("pgpass", "https://n8n.example.com/", "https://hooks.example.com");
    provisioner(transport)
        .deploy(&target(), &plan)
        .await
        .expect("deploy succeeds");

    let executed = session.executed();
    assert!(
        executed
            .iter()
            .any(|cmd| cmd.contains("CREATE DATABASE n8n_queue;"))
    );
    let deploys: Vec<&String> = executed
        .iter()
        .filter(|cmd| cmd.contains("docker stack deploy"))
        .collect();
    assert_eq!(deploys.len(), 3);
    assert!(deploys.first().is_some_and(|cmd| cmd.ends_with("n8n_editor")));
    assert!(deploys.last().is_some_and(|cmd| cmd.ends_with("n8n_worker")));
}

#[tokio::test]
async fn database_failure_aborts_before_any_upload() {
    let transport = ScriptedTransport::new();
    let session = ScriptedSession::new();
    session.push_output(0, "abc123\n", "");
    session.push_output(1, "", "");
    session.push_output(1, "", "FATAL: connection refused");
    transport.push_session(session.clone());

    let plan = apps::baserow_plan("https://base.example.com", "pgpass");
    provisioner(transport)
        .deploy(&target(), &plan)
        .await
        .expect_err("database failure is fatal");
    assert!(session.uploads().is_empty());
    assert!(session.is_closed());
}
