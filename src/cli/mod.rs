//! Command-line interface definitions for the `flotilla` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `flotilla` binary.
#[derive(Debug, Parser)]
#[command(
    name = "flotilla",
    about = "Provision Docker Swarm hosts and deploy application stacks over SSH",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Connection details for the remote host.
#[derive(Args, Clone, Debug)]
pub(crate) struct HostArgs {
    /// Remote host name or IP address.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: String,
    /// SSH port.
    #[arg(long, value_name = "PORT", default_value_t = 22)]
    pub(crate) port: u16,
    /// SSH username.
    #[arg(long, value_name = "USER", default_value = "root")]
    pub(crate) user: String,
    /// SSH password; prefer FLOTILLA_SSH_PASSWORD over passing this flag.
    #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_SSH_PASSWORD")]
    pub(crate) password: Option<String>,
    /// Path to an SSH private key, used instead of a password.
    #[arg(long, value_name = "PATH", conflicts_with = "password")]
    pub(crate) key_file: Option<String>,
}

/// Subcommands of the `flotilla` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Check that an SSH session can be established.
    Verify {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Probe the host and print a status snapshot as JSON.
    Status {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Install Docker, pin the API version, init the swarm, and create the
    /// overlay network.
    Provision {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Address the swarm manager advertises; defaults to the host.
        #[arg(long, value_name = "ADDR")]
        advertise_addr: Option<String>,
    },
    /// Install the Docker engine if it is missing.
    InstallDocker {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Upgrade Docker packages in place.
    UpgradeDocker {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Install ctop if it is missing.
    InstallCtop {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Pin the minimum Docker API version via a systemd drop-in.
    PinApiVersion {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Initialise a swarm on the host.
    InitSwarm {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Address the swarm manager advertises; defaults to the host.
        #[arg(long, value_name = "ADDR")]
        advertise_addr: Option<String>,
    },
    /// Create the shared overlay network.
    CreateNetwork {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// List the stacks deployed on the host.
    Stacks {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
    },
    /// Deploy an application to the host.
    Deploy {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Application to deploy.
        #[command(subcommand)]
        app: DeployApp,
    },
    /// Print a stack's environment as JSON, read from its first service.
    StackEnv {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Stack name.
        #[arg(value_name = "STACK")]
        stack: String,
    },
    /// Apply KEY=VALUE environment updates to every service in a stack.
    UpdateStackEnv {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Stack name.
        #[arg(value_name = "STACK")]
        stack: String,
        /// Environment updates as KEY=VALUE pairs.
        #[arg(value_name = "KEY=VALUE", required = true)]
        updates: Vec<String>,
    },
    /// Force-restart every service in a stack.
    RestartStack {
        /// Remote host connection details.
        #[command(flatten)]
        host: HostArgs,
        /// Stack name.
        #[arg(value_name = "STACK")]
        stack: String,
    },
    /// Manage DNS records through the provider API.
    Dns {
        /// DNS operation.
        #[command(subcommand)]
        command: DnsCommand,
    },
}

/// Applications the `deploy` subcommand can install.
#[derive(Debug, Subcommand)]
pub(crate) enum DeployApp {
    /// Traefik reverse proxy with ACME certificates.
    Traefik {
        /// Contact email for the ACME account.
        #[arg(long, value_name = "EMAIL")]
        email: String,
    },
    /// Portainer management UI.
    Portainer {
        /// Hostname Portainer is served from.
        #[arg(long, value_name = "HOST")]
        portainer_host: String,
    },
    /// Redis, deployed directly or through the local Portainer API.
    Redis {
        /// Deploy through the Portainer API instead of `docker stack deploy`.
        #[arg(long)]
        via_portainer: bool,
        /// Portainer API key; prefer FLOTILLA_PORTAINER_API_KEY.
        #[arg(long, value_name = "KEY", env = "FLOTILLA_PORTAINER_API_KEY")]
        api_key: Option<String>,
        /// Portainer username for credential auth.
        #[arg(long, value_name = "USER", requires = "portainer_password")]
        portainer_user: Option<String>,
        /// Portainer password for credential auth.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_PORTAINER_PASSWORD")]
        portainer_password: Option<String>,
    },
    /// Postgres database server.
    Postgres {
        /// Superuser password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_POSTGRES_PASSWORD")]
        postgres_password: String,
    },
    /// RabbitMQ with its management UI.
    Rabbitmq {
        /// Management UI user.
        #[arg(long, value_name = "USER")]
        user: String,
        /// Management UI password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_RABBITMQ_PASSWORD")]
        password: String,
        /// Hostname the management UI is served from.
        #[arg(long, value_name = "URL")]
        base_url: String,
    },
    /// MinIO object storage.
    Minio {
        /// Root user.
        #[arg(long, value_name = "USER")]
        user: String,
        /// Root password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_MINIO_PASSWORD")]
        password: String,
        /// Console domain.
        #[arg(long, value_name = "URL")]
        console_url: String,
        /// S3 API domain.
        #[arg(long, value_name = "URL")]
        api_url: String,
    },
    /// Baserow no-code database.
    Baserow {
        /// Hostname Baserow is served from.
        #[arg(long, value_name = "URL")]
        base_url: String,
        /// Postgres superuser password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_POSTGRES_PASSWORD")]
        postgres_password: String,
    },
    /// Chatwoot support desk (admin and sidekiq stacks).
    Chatwoot {
        /// Postgres superuser password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_POSTGRES_PASSWORD")]
        postgres_password: String,
        /// MinIO root user for attachment storage.
        #[arg(long, value_name = "USER")]
        minio_user: String,
        /// MinIO root password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_MINIO_PASSWORD")]
        minio_password: String,
        /// Public MinIO S3 endpoint URL.
        #[arg(long, value_name = "URL")]
        minio_public_url: String,
        /// Chatwoot frontend URL.
        #[arg(long, value_name = "URL")]
        chatwoot_url: String,
    },
    /// n8n workflow automation (editor, webhook, and worker stacks).
    N8n {
        /// Postgres superuser password.
        #[arg(long, value_name = "PASSWORD", env = "FLOTILLA_POSTGRES_PASSWORD")]
        postgres_password: String,
        /// Editor hostname.
        #[arg(long, value_name = "URL")]
        host_url: String,
        /// Webhook hostname.
        #[arg(long, value_name = "URL")]
        webhook_url: String,
    },
}

/// DNS operations against the provider API.
#[derive(Debug, Subcommand)]
pub(crate) enum DnsCommand {
    /// List the zones visible to the API token.
    Zones,
    /// Create a proxied A record.
    Create {
        /// Zone identifier.
        #[arg(long, value_name = "ZONE_ID")]
        zone_id: String,
        /// Fully qualified record name.
        #[arg(long, value_name = "NAME")]
        name: String,
        /// IPv4 address the record points to.
        #[arg(long, value_name = "IP")]
        ip: String,
    },
    /// List A records in a zone, optionally filtered by address.
    List {
        /// Zone identifier.
        #[arg(long, value_name = "ZONE_ID")]
        zone_id: String,
        /// Only show records pointing at this address.
        #[arg(long, value_name = "IP")]
        ip: Option<String>,
    },
    /// Point every A record at an old address to a new one.
    Repoint {
        /// Zone identifier.
        #[arg(long, value_name = "ZONE_ID")]
        zone_id: String,
        /// Address the records currently point to.
        #[arg(long, value_name = "IP")]
        old_ip: String,
        /// Address the records should point to.
        #[arg(long, value_name = "IP")]
        new_ip: String,
    },
    /// Delete a record.
    Delete {
        /// Zone identifier.
        #[arg(long, value_name = "ZONE_ID")]
        zone_id: String,
        /// Record identifier.
        #[arg(long, value_name = "RECORD_ID")]
        record_id: String,
    },
}
