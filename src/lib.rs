//! Core library for the Flotilla swarm provisioning tool.
//!
//! The crate exposes a session abstraction for running commands on remote
//! hosts over SSH, probes and sequences that converge a Debian host onto a
//! working Docker Swarm manager, a stack templating and deployment
//! pipeline, and clients for the DNS provider and Portainer APIs.

pub mod apps;
pub mod config;
pub mod dns;
pub mod exec;
pub mod ops;
pub mod portainer;
pub mod probe;
pub mod registry;
pub mod sequence;
pub mod service;
pub mod session;
pub mod stack;
pub mod status;
pub mod test_support;

pub use apps::ChatwootInputs;
pub use config::{ConfigError, FlotillaConfig};
pub use dns::{DnsClient, DnsError, DnsRecord, Zone};
pub use exec::{CommandError, CommandInvocation, CommandResult, DEFAULT_COMMAND_TIMEOUT};
pub use ops::{OpError, ProvisionOutcome, Provisioner};
pub use portainer::{PortainerAuth, PortainerError};
pub use registry::{
    AlreadyRunning, OperationRegistry, OperationState, OperationStatus, OperationTicket,
};
pub use sequence::{Satisfied, SequenceError, SequenceStep};
pub use service::{RestartSummary, ServiceError};
pub use session::openssh::{OpenSshSession, OpenSshTransport};
pub use session::{
    ConnectError, Credential, ExecError, ExecOutput, Session, SessionTarget, Transport,
    TransferError,
};
pub use stack::{ContainerExec, DeployError, DeployPlan, RenderedStack};
pub use status::StatusSnapshot;
