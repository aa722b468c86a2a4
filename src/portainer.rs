//! Stack deployment through a Portainer instance reached over the session.
//!
//! Portainer's ports are rarely exposed to the network, so every API call
//! runs as `curl` against `127.0.0.1:9000` on the remote host. Request
//! bodies are staged to remote temp files, responses are written to a
//! remote file and read back, and both are removed afterwards.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::exec::{self, CommandError, CommandInvocation};
use crate::session::{Session, TransferError};

/// API base on the remote host's loopback interface. IPv4 is spelled out
/// to sidestep hosts where `localhost` resolves to `::1`.
pub const LOCAL_API_BASE: &str = "http://127.0.0.1:9000/api";

const CURL_TIMEOUT: Duration = Duration::from_secs(45);

/// Credential used to authenticate against the Portainer API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PortainerAuth {
    /// A pre-provisioned API key sent as `X-API-Key`.
    ApiKey(String),
    /// Username and password exchanged for a JWT via `/auth`.
    Credentials {
        /// Portainer username.
        username: String,
        /// Portainer password.
        password: String,
    },
}

/// Errors raised while talking to Portainer.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum PortainerError {
    /// Authentication did not yield a token.
    #[error("portainer authentication failed: {message}")]
    Auth {
        /// Failure description.
        message: String,
    },
    /// The API answered with a recognisable HTTP failure.
    #[error("portainer API error: {message}")]
    Api {
        /// Failure description.
        message: String,
    },
    /// No endpoint with status Up was registered.
    #[error("no active portainer endpoint found")]
    NoActiveEndpoint,
    /// A response body could not be parsed.
    #[error("unexpected portainer response: {snippet}")]
    UnexpectedResponse {
        /// Leading portion of the unparseable body.
        snippet: String,
    },
    /// The underlying curl command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Staging a request body on the remote host failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    #[serde(rename = "Id")]
    id: u64,
    #[serde(rename = "Status")]
    status: u8,
}

#[derive(Debug, Deserialize)]
struct StackSummary {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct DockerInfo {
    #[serde(rename = "Swarm")]
    swarm: Option<SwarmInfo>,
}

#[derive(Debug, Deserialize)]
struct SwarmInfo {
    #[serde(rename = "Cluster")]
    cluster: Option<ClusterInfo>,
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedStack {
    #[serde(rename = "Id")]
    id: Option<u64>,
}

enum AuthHeader {
    Bearer(String),
    ApiKey(String),
}

impl AuthHeader {
    fn curl_flag(&self) -> String {
        match self {
            Self::Bearer(token) => format!("-H 'Authorization: Bearer {token}'"),
            Self::ApiKey(key) => format!("-H 'X-API-Key: {key}'"),
        }
    }
}

/// Maps a non-JSON response body to the failure it represents.
fn classify_raw_body(body: &str) -> PortainerError {
    if body.contains("404") {
        PortainerError::Api {
            message: String::from("404 Not Found"),
        }
    } else if body.contains("401") {
        PortainerError::Api {
            message: String::from("401 Unauthorized"),
        }
    } else if body.contains("Bad Request") {
        PortainerError::Api {
            message: format!("400 Bad Request: {}", snippet(body)),
        }
    } else {
        PortainerError::UnexpectedResponse {
            snippet: snippet(body),
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

async fn api_call<T: serde::de::DeserializeOwned>(
    session: &mut dyn Session,
    method: &str,
    endpoint: &str,
    auth: Option<&AuthHeader>,
    body: Option<&serde_json::Value>,
) -> Result<T, PortainerError> {
    let token = Uuid::new_v4().simple();
    let json_path = format!("/tmp/flotilla-{token}.json");
    let out_path = format!("/tmp/flotilla-{token}.out");

    let data_arg = if let Some(body) = body {
        session.upload(&json_path, &body.to_string()).await?;
        format!("-d @{json_path}")
    } else {
        String::new()
    };
    let auth_arg = auth.map(AuthHeader::curl_flag).unwrap_or_default();

    let url = format!("{LOCAL_API_BASE}{endpoint}");
    let curl = CommandInvocation::new(format!(
        "curl --max-time 30 -s -S -X {method} {auth_arg} \
         -H 'Content-Type: application/json' {data_arg} '{url}' -o {out_path}"
    ))
    .with_timeout(CURL_TIMEOUT);
    let curl_result = exec::run(session, &curl).await;

    let body_text = match curl_result {
        Ok(_) => {
            let cat = CommandInvocation::new(format!("cat {out_path}")).ignoring_failure();
            exec::run(session, &cat).await.map(|result| result.stdout)
        }
        Err(err) => Err(err),
    };

    // Remote temp files go away whether or not the call worked.
    let cleanup =
        CommandInvocation::new(format!("rm -f {json_path} {out_path}")).ignoring_failure();
    if let Err(err) = exec::run(session, &cleanup).await {
        tracing::warn!(error = %err, "failed to remove portainer temp files");
    }

    let body_text = body_text?;
    serde_json::from_str(body_text.trim()).map_err(|_| classify_raw_body(&body_text))
}

async fn authenticate(
    session: &mut dyn Session,
    auth: &PortainerAuth,
) -> Result<AuthHeader, PortainerError> {
    match auth {
        PortainerAuth::ApiKey(key) => Ok(AuthHeader::ApiKey(key.clone())),
        PortainerAuth::Credentials { username, password } => {
            let payload = json!({ "Username": username, "Password": password });
            let response: AuthResponse =
                api_call(session, "POST", "/auth", None, Some(&payload)).await?;
            response
                .jwt
                .map(AuthHeader::Bearer)
                .ok_or_else(|| PortainerError::Auth {
                    message: String::from("auth response carried no jwt"),
                })
        }
    }
}

async fn active_endpoint_id(
    session: &mut dyn Session,
    header: &AuthHeader,
) -> Result<u64, PortainerError> {
    let endpoints: Vec<Endpoint> =
        api_call(session, "GET", "/endpoints", Some(header), None).await?;
    endpoints
        .iter()
        .find(|endpoint| endpoint.status == 1)
        .map(|endpoint| endpoint.id)
        .ok_or(PortainerError::NoActiveEndpoint)
}

async fn swarm_cluster_id(
    session: &mut dyn Session,
    header: &AuthHeader,
    endpoint_id: u64,
) -> Option<String> {
    let info: Result<DockerInfo, PortainerError> = api_call(
        session,
        "GET",
        &format!("/endpoints/{endpoint_id}/docker/info"),
        Some(header),
        None,
    )
    .await;
    info.ok()
        .and_then(|info| info.swarm)
        .and_then(|swarm| swarm.cluster)
        .map(|cluster| cluster.id)
}

/// Deploys a stack through the Portainer API.
///
/// Authenticates, picks the first endpoint whose status is Up, and skips
/// the deploy entirely when a stack with the same name already exists.
/// The swarm cluster ID is read from the endpoint; when unavailable a
/// placeholder is sent, which Portainer accepts for single-cluster hosts.
///
/// Returns `true` when the stack was created and `false` when it already
/// existed.
///
/// # Errors
///
/// Returns [`PortainerError`] when authentication, endpoint discovery, or
/// stack creation fails.
pub async fn deploy_stack(
    session: &mut dyn Session,
    auth: &PortainerAuth,
    stack_name: &str,
    stack_content: &str,
) -> Result<bool, PortainerError> {
    let header = authenticate(session, auth).await?;
    let endpoint_id = active_endpoint_id(session, &header).await?;

    let stacks: Vec<StackSummary> =
        api_call(session, "GET", "/stacks", Some(&header), None).await?;
    if stacks.iter().any(|stack| stack.name == stack_name) {
        tracing::info!(stack = stack_name, "stack already present in portainer");
        return Ok(false);
    }

    let swarm_id = swarm_cluster_id(session, &header, endpoint_id)
        .await
        .unwrap_or_else(|| String::from("placeholder"));
    let payload = json!({
        "Name": stack_name,
        "StackFileContent": stack_content,
        "SwarmID": swarm_id,
    });
    let created: CreatedStack = api_call(
        session,
        "POST",
        &format!("/stacks?type=1&method=string&endpointId={endpoint_id}"),
        Some(&header),
        Some(&payload),
    )
    .await?;

    if created.id.is_some() {
        Ok(true)
    } else {
        Err(PortainerError::Api {
            message: format!("stack creation returned no id for `{stack_name}`"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;

    fn push_api_response(session: &ScriptedSession, body: &str) {
        // curl writes the body to the out file; then cat echoes it; then rm.
        session.push_success();
        session.push_output(0, body, "");
        session.push_success();
    }

    #[tokio::test]
    async fn deploy_skips_existing_stack() {
        let session = ScriptedSession::new();
        push_api_response(&session, r#"{"jwt":"token123"}"#);
        push_api_response(&session, r#"[{"Id":3,"Status":1,"Name":"primary"}]"#);
        push_api_response(&session, r#"[{"Id":1,"Name":"redis"}]"#);
        let mut handle = session.clone();
        let auth = PortainerAuth::Credentials {
            username: String::from("admin"),
            password: String::from("admin12345"),
        };
        let created = deploy_stack(&mut handle, &auth, "redis", "version: '3'\n")
            .await
            .expect("existing stack is fine");
        assert!(!created);
    }

    #[tokio::test]
    async fn deploy_creates_stack_with_swarm_id() {
        let session = ScriptedSession::new();
        push_api_response(&session, r#"[{"Id":3,"Status":1}]"#);
        push_api_response(&session, "[]");
        push_api_response(&session, r#"{"Swarm":{"Cluster":{"ID":"abcd1234"}}}"#);
        push_api_response(&session, r#"{"Id":9,"Name":"redis"}"#);
        let mut handle = session.clone();
        let auth = PortainerAuth::ApiKey(String::from("ptr_key"));
        let created = deploy_stack(&mut handle, &auth, "redis", "version: '3'\n")
            .await
            .expect("stack deploys");
        assert!(created);
        let uploads = session.uploads();
        assert!(
            uploads
                .last()
                .is_some_and(|(_, content)| content.contains("\"SwarmID\":\"abcd1234\""))
        );
        let executed = session.executed();
        assert!(
            executed
                .iter()
                .any(|cmd| cmd.contains("/stacks?type=1&method=string&endpointId=3"))
        );
        assert!(executed.iter().any(|cmd| cmd.contains("X-API-Key: ptr_key")));
    }

    #[tokio::test]
    async fn missing_jwt_is_an_auth_error() {
        let session = ScriptedSession::new();
        push_api_response(&session, "{}");
        let mut handle = session.clone();
        let auth = PortainerAuth::Credentials {
            username: String::from("admin"),
            password: String::from("wrong"),
        };
        let err = deploy_stack(&mut handle, &auth, "redis", "")
            .await
            .expect_err("auth fails");
        assert!(matches!(err, PortainerError::Auth { .. }));
    }

    #[tokio::test]
    async fn no_active_endpoint_is_reported() {
        let session = ScriptedSession::new();
        push_api_response(&session, r#"{"jwt":"token123"}"#);
        push_api_response(&session, r#"[{"Id":3,"Status":2}]"#);
        let mut handle = session.clone();
        let auth = PortainerAuth::Credentials {
            username: String::from("admin"),
            password: String::from("admin12345"),
        };
        let err = deploy_stack(&mut handle, &auth, "redis", "")
            .await
            .expect_err("no endpoint");
        assert_eq!(err, PortainerError::NoActiveEndpoint);
    }

    #[test]
    fn raw_body_classification() {
        assert!(matches!(
            classify_raw_body("<html>404 page not found</html>"),
            PortainerError::Api { message } if message.contains("404")
        ));
        assert!(matches!(
            classify_raw_body("Unauthorized 401"),
            PortainerError::Api { message } if message.contains("401")
        ));
        assert!(matches!(
            classify_raw_body("Bad Request: invalid payload"),
            PortainerError::Api { message } if message.contains("400")
        ));
        assert!(matches!(
            classify_raw_body("garbage"),
            PortainerError::UnexpectedResponse { .. }
        ));
    }
}
