use crate::error::{Error, Result};
use crate::remote::{CommandOutput, RemoteShell, Transport};
use crate::targets::{credential_str, CredentialSet, TargetContext};
use std::process::Command;
use std::sync::Arc;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the server host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

impl SshClient {
    /// Build a client from a server's credentials (`host`, `username`, and
    /// optionally `port` and `key`). `host` may carry the port as `host:port`.
    pub fn from_credentials(credentials: &CredentialSet, handle: &str) -> Result<Self> {
        let raw_host = credential_str(credentials, "host").ok_or_else(|| {
            Error::credentials_missing(handle.to_string(), vec!["host".to_string()])
        })?;
        let user = credential_str(credentials, "username").ok_or_else(|| {
            Error::credentials_missing(handle.to_string(), vec!["username".to_string()])
        })?;

        let (host, host_port) = split_host_port(raw_host);
        let port = match credentials.get("port") {
            Some(value) => parse_port(value).ok_or_else(|| {
                Error::validation_invalid_argument(
                    "port",
                    "Port must be a number between 1 and 65535",
                    Some(handle.to_string()),
                    None,
                )
            })?,
            None => host_port.unwrap_or(22),
        };

        let identity_file = match credential_str(credentials, "key") {
            Some(path) => {
                let expanded = shellexpand::tilde(path).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::validation_invalid_argument(
                        "key",
                        format!("SSH key not found: {}", expanded),
                        Some(handle.to_string()),
                        None,
                    ));
                }
                Some(expanded)
            }
            None => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Target '{}' is localhost, using local execution", handle);
        }

        Ok(Self {
            host: host.to_string(),
            user: user.to_string(),
            port,
            identity_file,
            is_local,
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never wait on a prompt or a stalled connection.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());
        args
    }

    pub fn execute(&self, command: &str) -> CommandOutput {
        self.execute_with_retry(command, 3)
    }

    fn execute_with_retry(&self, command: &str, max_attempts: u32) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3
        let mut result = self.execute_once(command);

        for attempt in 1..max_attempts {
            // Only retry on transient connection errors, not command failures
            if result.success || !is_transient_ssh_error(&result) {
                break;
            }

            let delay = backoff_secs.get(attempt as usize).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "Connection to {} failed (attempt {}/{}), retrying in {}s...",
                self.host,
                attempt,
                max_attempts,
                delay
            );
            std::thread::sleep(std::time::Duration::from_secs(delay));
            result = self.execute_once(command);
        }

        result
    }

    fn execute_once(&self, command: &str) -> CommandOutput {
        if self.is_local {
            return execute_local_command(command);
        }

        match Command::new("ssh").args(self.build_ssh_args(command)).output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(format!("SSH error: {}", e), -1),
        }
    }
}

impl RemoteShell for SshClient {
    fn run(&self, command: &str) -> CommandOutput {
        self.execute(command)
    }
}

/// Opens an [`SshClient`] per target.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshTransport;

impl Transport for SshTransport {
    fn connect(&self, target: &TargetContext) -> Result<Arc<dyn RemoteShell>> {
        Ok(Arc::new(SshClient::from_credentials(
            &target.credentials,
            &target.handle,
        )?))
    }
}

pub fn execute_local_command(command: &str) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::failed(format!("Command error: {}", e), -1),
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

fn split_host_port(host: &str) -> (&str, Option<u16>) {
    // Bare IPv6 addresses contain colons but no port.
    if host.matches(':').count() > 1 {
        return (host, None);
    }
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}

fn parse_port(value: &serde_json::Value) -> Option<u16> {
    let port = match value {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u16::try_from(port).ok().filter(|p| *p > 0)
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "could not resolve hostname",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials(value: serde_json::Value) -> CredentialSet {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn from_credentials_reads_port_from_host_or_field() {
        let client = SshClient::from_credentials(
            &credentials(json!({"host": "example.com:2222", "username": "deploy"})),
            "production",
        )
        .unwrap();
        assert_eq!(client.host, "example.com");
        assert_eq!(client.port, 2222);
        assert!(!client.is_local);

        let client = SshClient::from_credentials(
            &credentials(json!({"host": "example.com", "username": "deploy", "port": "2200"})),
            "production",
        )
        .unwrap();
        assert_eq!(client.port, 2200);
    }

    #[test]
    fn from_credentials_requires_host_and_username() {
        let err = SshClient::from_credentials(&credentials(json!({"host": "example.com"})), "production")
            .err()
            .unwrap();
        assert_eq!(err.code.as_str(), "credentials.missing");
        assert_eq!(err.details["missingFields"], json!(["username"]));
    }

    #[test]
    fn from_credentials_rejects_missing_key_file() {
        let err = SshClient::from_credentials(
            &credentials(json!({
                "host": "example.com",
                "username": "deploy",
                "key": "/nonexistent/id_rsa"
            })),
            "production",
        )
        .err()
        .unwrap();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn ssh_args_include_port_and_batch_mode() {
        let client = SshClient {
            host: "example.com".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            identity_file: Some("/keys/id".to_string()),
            is_local: false,
        };
        let args = client.build_ssh_args("ls");
        assert_eq!(&args[..4], ["-i", "/keys/id", "-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@example.com");
        assert_eq!(args[args.len() - 1], "ls");
    }

    #[test]
    fn localhost_runs_locally() {
        let client = SshClient::from_credentials(
            &credentials(json!({"host": "localhost", "username": "me"})),
            "local",
        )
        .unwrap();
        assert!(client.is_local);
        let output = client.run("echo hello");
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn exit_255_is_transient() {
        assert!(is_transient_ssh_error(&CommandOutput::failed("", 255)));
        assert!(!is_transient_ssh_error(&CommandOutput::failed("No such file", 1)));
    }
}
