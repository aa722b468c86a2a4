//! OpenSSH-backed transport using connection multiplexing.
//!
//! Connecting establishes a ControlMaster process bound to a unique control
//! socket; every subsequent command in the session is multiplexed over that
//! socket, so a logical operation pays the authentication cost once. File
//! uploads go through `scp` on the same socket from a local staging file
//! that is deleted regardless of outcome. Closing the session tears the
//! master down with `ssh -O exit`.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::process::Command;
use uuid::Uuid;

use super::{
    ConnectError, Credential, ExecError, ExecOutput, Session, SessionFuture, SessionTarget,
    Transport, TransferError,
};

const MASTER_HANDSHAKE_GRACE: Duration = Duration::from_secs(5);

/// Transport that drives the system `ssh`, `scp`, and `sshpass` binaries.
#[derive(Clone, Debug)]
pub struct OpenSshTransport {
    ssh_bin: String,
    scp_bin: String,
    sshpass_bin: String,
}

impl OpenSshTransport {
    /// Creates a transport from binary paths.
    #[must_use]
    pub fn new(
        ssh_bin: impl Into<String>,
        scp_bin: impl Into<String>,
        sshpass_bin: impl Into<String>,
    ) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            scp_bin: scp_bin.into(),
            sshpass_bin: sshpass_bin.into(),
        }
    }

    async fn establish(&self, target: &SessionTarget) -> Result<OpenSshSession, ConnectError> {
        let control_path = control_socket_path();
        let args = master_args(target, &control_path);

        let (program, password) = match &target.credential {
            Credential::Password(password) => (self.sshpass_bin.clone(), Some(password.clone())),
            Credential::KeyFile(_) => (self.ssh_bin.clone(), None),
        };

        let mut command = Command::new(&program);
        if let Some(password) = &password {
            // sshpass -e reads the password from SSHPASS instead of argv.
            command.arg("-e").env("SSHPASS", password).arg(&self.ssh_bin);
        }
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let wait = target.connect_timeout + MASTER_HANDSHAKE_GRACE;
        let output = tokio::time::timeout(wait, command.output())
            .await
            .map_err(|_| ConnectError::Timeout {
                host: target.host.clone(),
                seconds: target.connect_timeout.as_secs(),
            })?
            .map_err(|err| ConnectError::Spawn {
                program,
                message: err.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(classify_connect_failure(
                &target.host,
                target.connect_timeout.as_secs(),
                &stderr,
            ));
        }

        Ok(OpenSshSession {
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            destination: format!("{}@{}", target.username, target.host),
            port: target.port,
            control_path,
            open: true,
        })
    }
}

impl Transport for OpenSshTransport {
    type Session = OpenSshSession;

    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Result<Self::Session, ConnectError>> {
        Box::pin(async move {
            tracing::info!(host = %target.host, user = %target.username, "opening session");
            self.establish(target).await
        })
    }
}

/// Session multiplexed over an OpenSSH control socket.
#[derive(Debug)]
pub struct OpenSshSession {
    ssh_bin: String,
    scp_bin: String,
    destination: String,
    port: u16,
    control_path: Utf8PathBuf,
    open: bool,
}

impl OpenSshSession {
    fn control_option(&self) -> String {
        format!("ControlPath={}", self.control_path)
    }

    async fn exec_inner(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let output = tokio::time::timeout(
            timeout,
            Command::new(&self.ssh_bin)
                .arg("-o")
                .arg(self.control_option())
                .arg("-p")
                .arg(self.port.to_string())
                .arg(&self.destination)
                .arg(command)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| ExecError::Timeout {
            seconds: timeout.as_secs(),
        })?
        .map_err(|err| ExecError::Channel {
            message: err.to_string(),
        })?;

        let exit_code = output.status.code().ok_or_else(|| ExecError::Channel {
            message: String::from("command terminated without an exit status"),
        })?;

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload_inner(
        &mut self,
        remote_path: &str,
        content: &str,
    ) -> Result<(), TransferError> {
        // The staging file is removed on drop, success or failure alike.
        let mut staging =
            tempfile::NamedTempFile::new().map_err(|err| TransferError {
                remote_path: remote_path.to_owned(),
                message: err.to_string(),
            })?;
        staging
            .write_all(content.as_bytes())
            .and_then(|()| staging.flush())
            .map_err(|err| TransferError {
                remote_path: remote_path.to_owned(),
                message: err.to_string(),
            })?;

        let output = Command::new(&self.scp_bin)
            .arg("-o")
            .arg(self.control_option())
            .arg("-P")
            .arg(self.port.to_string())
            .arg(staging.path())
            .arg(format!("{}:{}", self.destination, remote_path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| TransferError {
                remote_path: remote_path.to_owned(),
                message: err.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransferError {
                remote_path: remote_path.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    async fn close_inner(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let result = Command::new(&self.ssh_bin)
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(self.control_option())
            .arg(&self.destination)
            .stdin(Stdio::null())
            .output()
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to stop ssh control master");
        }
    }
}

impl Session for OpenSshSession {
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> SessionFuture<'a, Result<ExecOutput, ExecError>> {
        Box::pin(self.exec_inner(command, timeout))
    }

    fn upload<'a>(
        &'a mut self,
        remote_path: &'a str,
        content: &'a str,
    ) -> SessionFuture<'a, Result<(), TransferError>> {
        Box::pin(self.upload_inner(remote_path, content))
    }

    fn close(&mut self) -> SessionFuture<'_, ()> {
        Box::pin(self.close_inner())
    }
}

fn control_socket_path() -> Utf8PathBuf {
    let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    dir.join(format!("flotilla-{}.sock", Uuid::new_v4().simple()))
}

fn master_args(target: &SessionTarget, control_path: &Utf8PathBuf) -> Vec<String> {
    let mut args = vec![
        String::from("-o"),
        String::from("ControlMaster=yes"),
        String::from("-o"),
        format!("ControlPath={control_path}"),
        String::from("-o"),
        String::from("ControlPersist=yes"),
        String::from("-o"),
        format!("ConnectTimeout={}", target.connect_timeout.as_secs()),
        String::from("-o"),
        String::from("StrictHostKeyChecking=no"),
        String::from("-o"),
        String::from("UserKnownHostsFile=/dev/null"),
        String::from("-p"),
        target.port.to_string(),
    ];
    if let Credential::KeyFile(path) = &target.credential {
        args.push(String::from("-o"));
        args.push(String::from("BatchMode=yes"));
        args.push(String::from("-i"));
        args.push(path.to_string());
    }
    args.push(String::from("-N"));
    args.push(String::from("-f"));
    args.push(format!("{}@{}", target.username, target.host));
    args
}

fn classify_connect_failure(host: &str, timeout_secs: u64, stderr: &str) -> ConnectError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("permission denied") || lowered.contains("authentication failed") {
        ConnectError::AuthenticationFailed {
            host: host.to_owned(),
            detail: stderr.trim().to_owned(),
        }
    } else if lowered.contains("timed out") {
        ConnectError::Timeout {
            host: host.to_owned(),
            seconds: timeout_secs,
        }
    } else {
        ConnectError::Unreachable {
            host: host.to_owned(),
            detail: stderr.trim().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_target() -> SessionTarget {
        SessionTarget::new(
            "203.0.113.4",
            "root",
            Credential::Password(String::from("secret")),
        )
    }

    #[test]
    fn master_args_include_multiplexing_options() {
        let control = Utf8PathBuf::from("/tmp/flotilla-test.sock");
        let args = master_args(&password_target(), &control);
        assert!(args.contains(&String::from("ControlMaster=yes")));
        assert!(args.contains(&String::from("ControlPath=/tmp/flotilla-test.sock")));
        assert_eq!(args.last(), Some(&String::from("root@203.0.113.4")));
    }

    #[test]
    fn master_args_key_auth_uses_batch_mode() {
        let target = SessionTarget::new(
            "203.0.113.4",
            "deploy",
            Credential::KeyFile(Utf8PathBuf::from("/home/deploy/.ssh/id_ed25519")),
        );
        let control = Utf8PathBuf::from("/tmp/flotilla-test.sock");
        let args = master_args(&target, &control);
        assert!(args.contains(&String::from("BatchMode=yes")));
        assert!(args.contains(&String::from("/home/deploy/.ssh/id_ed25519")));
    }

    #[test]
    fn connect_failure_classifies_auth_rejection() {
        let err = classify_connect_failure("h", 30, "root@h: Permission denied (password).");
        assert!(matches!(err, ConnectError::AuthenticationFailed { .. }));
    }

    #[test]
    fn connect_failure_classifies_timeout() {
        let err = classify_connect_failure("h", 30, "ssh: connect to host h port 22: Connection timed out");
        assert!(matches!(err, ConnectError::Timeout { seconds: 30, .. }));
    }

    #[test]
    fn connect_failure_defaults_to_unreachable() {
        let err = classify_connect_failure("h", 30, "ssh: Could not resolve hostname h");
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }
}
