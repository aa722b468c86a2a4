//! Application catalogue: embedded compose templates and the deploy plans
//! that wire them together.
//!
//! Each plan builder captures what one application needs: which databases
//! must exist, which stacks deploy in which order, and which post-deploy
//! commands run once the containers are up. Domain inputs arrive as URLs
//! from callers; templates want bare hostnames, so schemes are stripped
//! here.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::stack::{ContainerExec, DeployPlan, RenderedStack};

const TRAEFIK_TEMPLATE: &str = include_str!("stacks/traefik.yml");
const PORTAINER_TEMPLATE: &str = include_str!("stacks/portainer.yml");
const REDIS_TEMPLATE: &str = include_str!("stacks/redis.yml");
const POSTGRES_TEMPLATE: &str = include_str!("stacks/postgres.yml");
const RABBITMQ_TEMPLATE: &str = include_str!("stacks/rabbitmq.yml");
const MINIO_TEMPLATE: &str = include_str!("stacks/minio.yml");
const BASEROW_TEMPLATE: &str = include_str!("stacks/baserow.yml");
const CHATWOOT_ADMIN_TEMPLATE: &str = include_str!("stacks/chatwoot_admin.yml");
const CHATWOOT_SIDEKIQ_TEMPLATE: &str = include_str!("stacks/chatwoot_sidekiq.yml");
const N8N_EDITOR_TEMPLATE: &str = include_str!("stacks/n8n_editor.yml");
const N8N_WEBHOOK_TEMPLATE: &str = include_str!("stacks/n8n_webhook.yml");
const N8N_WORKER_TEMPLATE: &str = include_str!("stacks/n8n_worker.yml");

const CONTAINER_POLL_ATTEMPTS: u32 = 12;
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Removes a leading `http://` or `https://` from a URL.
#[must_use]
pub fn strip_scheme(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_owned()
}

fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(token, value)| ((*token).to_owned(), (*value).to_owned()))
        .collect()
}

/// Plan for the Traefik reverse proxy, with the ACME contact email.
#[must_use]
pub fn traefik_plan(email: &str) -> DeployPlan {
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "traefik",
            TRAEFIK_TEMPLATE,
            &values(&[("{email}", email)]),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for Portainer, exposed at the given hostname.
#[must_use]
pub fn portainer_plan(portainer_host: &str) -> DeployPlan {
    let host = strip_scheme(portainer_host);
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "portainer",
            PORTAINER_TEMPLATE,
            &values(&[("{{PORTAINER_HOST}}", &host)]),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for Redis. The template has no placeholders.
#[must_use]
pub fn redis_plan() -> DeployPlan {
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "redis",
            REDIS_TEMPLATE,
            &BTreeMap::new(),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for Postgres with its superuser password.
#[must_use]
pub fn postgres_plan(postgres_password: &str) -> DeployPlan {
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "postgres",
            POSTGRES_TEMPLATE,
            &values(&[("${POSTGRES_PASSWORD}", postgres_password)]),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for RabbitMQ with management UI credentials and hostname.
#[must_use]
pub fn rabbitmq_plan(user: &str, password: &str, base_url: &str) -> DeployPlan {
    let host = strip_scheme(base_url);
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "rabbitmq",
            RABBITMQ_TEMPLATE,
            &values(&[
                ("{Usuario_Rabbit}", user),
                ("{Senha_Rabbit}", password),
                ("{BaseUrl_Rabbit}", &host),
            ]),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for MinIO with root credentials, console domain, and S3 API domain.
#[must_use]
pub fn minio_plan(
    user: &str,
    password: &str,
    console_url: &str,
    api_url: &str,
) -> DeployPlan {
    let console_domain = strip_scheme(console_url);
    let api_domain = strip_scheme(api_url);
    DeployPlan {
        stacks: vec![RenderedStack::new(
            "minio",
            MINIO_TEMPLATE,
            &values(&[
                ("{Usuario_Minio}", user),
                ("{Senha_Minio}", password),
                ("{Console_Domain}", &console_domain),
                ("{Domain}", &api_domain),
            ]),
        )],
        ..DeployPlan::default()
    }
}

/// Plan for Baserow: requires the `baserow` database in Postgres.
#[must_use]
pub fn baserow_plan(base_url: &str, postgres_password: &str) -> DeployPlan {
    let host = strip_scheme(base_url);
    DeployPlan {
        databases: vec![String::from("baserow")],
        stacks: vec![RenderedStack::new(
            "baserow",
            BASEROW_TEMPLATE,
            &values(&[
                ("{BaseUrl_Baserow}", &host),
                ("{Senha_Baserow}", postgres_password),
            ]),
        )],
        post: Vec::new(),
    }
}

/// Inputs shared by the Chatwoot admin and sidekiq stacks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatwootInputs {
    /// Postgres superuser password.
    pub postgres_password: String,
    /// MinIO root user for attachment storage.
    pub minio_user: String,
    /// MinIO root password.
    pub minio_password: String,
    /// Public MinIO S3 endpoint URL.
    pub minio_public_url: String,
    /// Chatwoot frontend URL.
    pub chatwoot_url: String,
}

/// Plan for Chatwoot: the `chatwoot` database, admin and sidekiq stacks,
/// then a best-effort `db:chatwoot_prepare` migration inside the admin
/// container once it appears.
#[must_use]
pub fn chatwoot_plan(inputs: &ChatwootInputs) -> DeployPlan {
    let minio_host = strip_scheme(&inputs.minio_public_url);
    let chatwoot_host = strip_scheme(&inputs.chatwoot_url);
    let shared = [
        ("{Senha_Postgres}", inputs.postgres_password.as_str()),
        ("{Usuario_Minio}", inputs.minio_user.as_str()),
        ("{Senha_Minio}", inputs.minio_password.as_str()),
        ("{BaseUrl_Publica_Minio}", minio_host.as_str()),
        ("{BaseUrl_chatwoot}", chatwoot_host.as_str()),
    ];
    // The admin template also carries the capitalised token in its Traefik
    // label, so both spellings are substituted there.
    let mut admin = shared.to_vec();
    admin.push(("{BaseUrl_Chatwoot}", chatwoot_host.as_str()));

    DeployPlan {
        databases: vec![String::from("chatwoot")],
        stacks: vec![
            RenderedStack::new("chatwoot_admin", CHATWOOT_ADMIN_TEMPLATE, &values(&admin)),
            RenderedStack::new(
                "chatwoot_sidekiq",
                CHATWOOT_SIDEKIQ_TEMPLATE,
                &values(&shared),
            ),
        ],
        post: vec![ContainerExec {
            container_filter: String::from("chatwoot_admin_chatwoot_admin"),
            command: String::from("bundle exec rails db:chatwoot_prepare"),
            attempts: CONTAINER_POLL_ATTEMPTS,
            interval: CONTAINER_POLL_INTERVAL,
        }],
    }
}

/// Plan for n8n: the `n8n_queue` database, then editor, webhook, and
/// worker stacks. Host URLs lose their scheme and any trailing slash.
#[must_use]
pub fn n8n_plan(postgres_password: &str, host_url: &str, webhook_url: &str) -> DeployPlan {
    let host = strip_scheme(host_url).trim_end_matches('/').to_owned();
    let webhook = strip_scheme(webhook_url).trim_end_matches('/').to_owned();
    let shared = values(&[
        ("{Senha_Postgres}", postgres_password),
        ("{N8N_HOST}", &host),
        ("{N8N_Webhook}", &webhook),
    ]);
    DeployPlan {
        databases: vec![String::from("n8n_queue")],
        stacks: vec![
            RenderedStack::new("n8n_editor", N8N_EDITOR_TEMPLATE, &shared),
            RenderedStack::new("n8n_webhook", N8N_WEBHOOK_TEMPLATE, &shared),
            RenderedStack::new("n8n_worker", N8N_WORKER_TEMPLATE, &shared),
        ],
        post: Vec::new(),
    }
}
