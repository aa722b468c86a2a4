//! Binary entry point for the Flotilla CLI.

use std::collections::BTreeMap;
use std::env;
use std::future::Future;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

use flotilla::{
    ChatwootInputs, Credential, DnsClient, DnsError, FlotillaConfig, OpError, OpenSshTransport,
    OperationRegistry, PortainerAuth, ProvisionOutcome, Provisioner, SessionTarget, apps,
    registry::AlreadyRunning,
};

mod cli;

use cli::{Cli, Command, DeployApp, DnsCommand, HostArgs};

/// Environment variable carrying the DNS provider API token.
const DNS_TOKEN_ENV: &str = "FLOTILLA_DNS_TOKEN";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no credential provided: set FLOTILLA_SSH_PASSWORD or pass --key-file")]
    MissingCredential,
    #[error("no DNS token provided: set {DNS_TOKEN_ENV}")]
    MissingDnsToken,
    #[error("portainer deploys need --api-key or --portainer-user with a password")]
    MissingPortainerAuth,
    #[error("invalid environment update `{0}`: expected KEY=VALUE")]
    InvalidUpdate(String),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Dns(#[from] DnsError),
    #[error(transparent)]
    Busy(#[from] AlreadyRunning),
    #[error("output error: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn target_from_args(config: &FlotillaConfig, host: &HostArgs) -> Result<SessionTarget, CliError> {
    let credential = if let Some(key_file) = &host.key_file {
        Credential::KeyFile(Utf8PathBuf::from(key_file))
    } else if let Some(password) = &host.password {
        Credential::Password(password.clone())
    } else {
        return Err(CliError::MissingCredential);
    };
    Ok(
        SessionTarget::new(host.host.clone(), host.user.clone(), credential)
            .with_port(host.port)
            .with_connect_timeout(config.connect_timeout()),
    )
}

fn provisioner_from_config(config: &FlotillaConfig) -> Provisioner<OpenSshTransport> {
    let transport = OpenSshTransport::new(
        config.ssh_bin.clone(),
        config.scp_bin.clone(),
        config.sshpass_bin.clone(),
    );
    Provisioner::new(
        transport,
        config.remote_stack_dir.clone(),
        config.overlay_network.clone(),
    )
}

fn dns_client_from_config(config: &FlotillaConfig) -> Result<DnsClient, CliError> {
    let token = env::var(DNS_TOKEN_ENV).map_err(|_| CliError::MissingDnsToken)?;
    Ok(DnsClient::new(config.dns_api_base.clone(), token))
}

/// Runs a long operation under the registry so a second invocation of the
/// same operation against an unfinished one is rejected, and the outcome
/// is recorded either way.
async fn tracked<F>(
    registry: &OperationRegistry,
    key: &str,
    future: F,
) -> Result<String, CliError>
where
    F: Future<Output = Result<String, OpError>>,
{
    let mut ticket = registry.begin(key)?;
    match future.await {
        Ok(message) => {
            ticket.succeed(message.clone());
            Ok(message)
        }
        Err(err) => {
            ticket.fail(err.to_string());
            Err(err.into())
        }
    }
}

fn outcome_message(operation: &str, outcome: ProvisionOutcome) -> String {
    match outcome {
        ProvisionOutcome::AlreadySatisfied => format!("{operation}: already satisfied"),
        ProvisionOutcome::Applied => format!("{operation}: applied"),
    }
}

fn emit(line: &str) -> Result<(), CliError> {
    writeln!(io::stdout(), "{line}").map_err(|err| CliError::Output(err.to_string()))
}

fn emit_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    emit(&rendered)
}

fn parse_updates(pairs: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| CliError::InvalidUpdate(pair.clone()))
        })
        .collect()
}

fn portainer_auth(
    api_key: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Result<PortainerAuth, CliError> {
    if let Some(key) = api_key {
        return Ok(PortainerAuth::ApiKey(key));
    }
    match (user, password) {
        (Some(username), Some(password)) => Ok(PortainerAuth::Credentials { username, password }),
        _ => Err(CliError::MissingPortainerAuth),
    }
}

fn deploy_plan_for(app: &DeployApp) -> flotilla::DeployPlan {
    match app {
        DeployApp::Traefik { email } => apps::traefik_plan(email),
        DeployApp::Portainer { portainer_host } => apps::portainer_plan(portainer_host),
        DeployApp::Redis { .. } => apps::redis_plan(),
        DeployApp::Postgres { postgres_password } => apps::postgres_plan(postgres_password),
        DeployApp::Rabbitmq {
            user,
            password,
            base_url,
        } => apps::rabbitmq_plan(user, password, base_url),
        DeployApp::Minio {
            user,
            password,
            console_url,
            api_url,
        } => apps::minio_plan(user, password, console_url, api_url),
        DeployApp::Baserow {
            base_url,
            postgres_password,
        } => apps::baserow_plan(base_url, postgres_password),
        DeployApp::Chatwoot {
            postgres_password,
            minio_user,
            minio_password,
            minio_public_url,
            chatwoot_url,
        } => apps::chatwoot_plan(&ChatwootInputs {
            postgres_password: postgres_password.clone(),
            minio_user: minio_user.clone(),
            minio_password: minio_password.clone(),
            minio_public_url: minio_public_url.clone(),
            chatwoot_url: chatwoot_url.clone(),
        }),
        DeployApp::N8n {
            postgres_password,
            host_url,
            webhook_url,
        } => apps::n8n_plan(postgres_password, host_url, webhook_url),
    }
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config =
        FlotillaConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provisioner = provisioner_from_config(&config);
    let registry = OperationRegistry::new();

    match cli.command {
        Command::Verify { host } => {
            let target = target_from_args(&config, &host)?;
            provisioner.verify_connection(&target).await?;
            emit(&format!("session to {} verified", host.host))?;
        }
        Command::Status { host } => {
            let target = target_from_args(&config, &host)?;
            let snapshot = provisioner.system_status(&target).await?;
            emit_json(&snapshot)?;
        }
        Command::Provision {
            host,
            advertise_addr,
        } => {
            let target = target_from_args(&config, &host)?;
            let addr = advertise_addr.unwrap_or_else(|| host.host.clone());
            let message = tracked(&registry, "provision", async {
                provisioner.provision(&target, &addr).await?;
                Ok(format!("host {} provisioned", host.host))
            })
            .await?;
            emit(&message)?;
        }
        Command::InstallDocker { host } => {
            let target = target_from_args(&config, &host)?;
            let message = tracked(&registry, "install-docker", async {
                let outcome = provisioner.install_docker(&target).await?;
                Ok(outcome_message("docker install", outcome))
            })
            .await?;
            emit(&message)?;
        }
        Command::UpgradeDocker { host } => {
            let target = target_from_args(&config, &host)?;
            let message = tracked(&registry, "upgrade-docker", async {
                provisioner.upgrade_docker(&target).await?;
                Ok(String::from("docker upgraded"))
            })
            .await?;
            emit(&message)?;
        }
        Command::InstallCtop { host } => {
            let target = target_from_args(&config, &host)?;
            let message = tracked(&registry, "install-ctop", async {
                let outcome = provisioner.install_ctop(&target).await?;
                Ok(outcome_message("ctop install", outcome))
            })
            .await?;
            emit(&message)?;
        }
        Command::PinApiVersion { host } => {
            let target = target_from_args(&config, &host)?;
            provisioner.apply_api_version_override(&target).await?;
            emit("docker API version pinned")?;
        }
        Command::InitSwarm {
            host,
            advertise_addr,
        } => {
            let target = target_from_args(&config, &host)?;
            let addr = advertise_addr.unwrap_or_else(|| host.host.clone());
            let outcome = provisioner.init_swarm(&target, &addr).await?;
            emit(&outcome_message("swarm init", outcome))?;
        }
        Command::CreateNetwork { host } => {
            let target = target_from_args(&config, &host)?;
            let outcome = provisioner.create_network(&target).await?;
            emit(&outcome_message("network create", outcome))?;
        }
        Command::Stacks { host } => {
            let target = target_from_args(&config, &host)?;
            let stacks = provisioner.active_stacks(&target).await?;
            for stack in stacks {
                emit(&stack)?;
            }
        }
        Command::Deploy { host, app } => {
            let target = target_from_args(&config, &host)?;
            if let DeployApp::Redis {
                via_portainer: true,
                api_key,
                portainer_user,
                portainer_password,
            } = app
            {
                let auth = portainer_auth(api_key, portainer_user, portainer_password)?;
                let plan = apps::redis_plan();
                let stack = plan
                    .stacks
                    .first()
                    .ok_or_else(|| CliError::Config(String::from("redis plan has no stack")))?;
                let created = provisioner
                    .deploy_via_portainer(&target, &auth, &stack.name, &stack.content)
                    .await?;
                if created {
                    emit("redis deployed via portainer")?;
                } else {
                    emit("redis already present in portainer")?;
                }
            } else {
                let plan = deploy_plan_for(&app);
                provisioner.deploy(&target, &plan).await?;
                emit("deployment complete")?;
            }
        }
        Command::StackEnv { host, stack } => {
            let target = target_from_args(&config, &host)?;
            let env = provisioner.stack_env(&target, &stack).await?;
            emit_json(&env)?;
        }
        Command::UpdateStackEnv {
            host,
            stack,
            updates,
        } => {
            let target = target_from_args(&config, &host)?;
            let updates = parse_updates(&updates)?;
            let count = provisioner
                .update_stack_env(&target, &stack, &updates)
                .await?;
            emit(&format!("updated {count} services in stack {stack}"))?;
        }
        Command::RestartStack { host, stack } => {
            let target = target_from_args(&config, &host)?;
            let summary = provisioner.restart_stack(&target, &stack).await?;
            for service in &summary.restarted {
                emit(&format!("restarted {service}"))?;
            }
            for (service, reason) in &summary.failed {
                emit(&format!("failed to restart {service}: {reason}"))?;
            }
            if !summary.is_complete() {
                return Ok(1);
            }
        }
        Command::Dns { command } => {
            let client = dns_client_from_config(&config)?;
            dispatch_dns(&client, command).await?;
        }
    }

    Ok(0)
}

async fn dispatch_dns(client: &DnsClient, command: DnsCommand) -> Result<(), CliError> {
    match command {
        DnsCommand::Zones => {
            for zone in client.list_zones().await? {
                emit(&format!("{}\t{}", zone.id, zone.name))?;
            }
        }
        DnsCommand::Create { zone_id, name, ip } => {
            match client.create_record(&zone_id, &name, &ip).await {
                Ok(record) => emit(&format!("created {} -> {}", record.name, record.content))?,
                Err(DnsError::RecordExists) => emit(&format!("record {name} already exists"))?,
                Err(err) => return Err(err.into()),
            }
        }
        DnsCommand::List { zone_id, ip } => {
            for record in client.list_records(&zone_id, ip.as_deref()).await? {
                emit(&format!(
                    "{}\t{}\t{}",
                    record.id, record.name, record.content
                ))?;
            }
        }
        DnsCommand::Repoint {
            zone_id,
            old_ip,
            new_ip,
        } => {
            let records = client.list_records(&zone_id, Some(&old_ip)).await?;
            if records.is_empty() {
                emit(&format!("no records point at {old_ip}"))?;
            }
            for record in records {
                let updated = client.update_record(&zone_id, &record, &new_ip).await?;
                emit(&format!("repointed {} -> {}", updated.name, updated.content))?;
            }
        }
        DnsCommand::Delete { zone_id, record_id } => {
            client.delete_record(&zone_id, &record_id).await?;
            emit(&format!("deleted record {record_id}"))?;
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    writeln!(io::stderr(), "{err}").ok();
}
