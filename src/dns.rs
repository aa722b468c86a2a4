//! DNS record management against a Cloudflare-compatible REST API.
//!
//! Every response arrives in the provider's envelope: a success flag, a
//! list of error messages, and an optional result. The envelope is
//! unwrapped in one place so each operation deals only with its payload.

use serde::{Deserialize, Serialize};

/// Errors raised by the DNS client.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum DnsError {
    /// The provider rejected a create because the record already exists.
    #[error("record already exists")]
    RecordExists,
    /// The provider reported a failure in its envelope.
    #[error("provider error: {message}")]
    Provider {
        /// First error message from the envelope.
        message: String,
    },
    /// The HTTP request itself failed.
    #[error("request failed: {message}")]
    Request {
        /// Transport-level failure description.
        message: String,
    },
    /// The response body was not a valid envelope.
    #[error("response decoding failed: {message}")]
    Decode {
        /// Decoder failure description.
        message: String,
    },
}

/// Provider response envelope wrapping every payload.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Error messages present on failure.
    #[serde(default)]
    pub errors: Vec<ProviderMessage>,
    /// Payload, present on success.
    pub result: Option<T>,
}

/// A single error message within the envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderMessage {
    /// Human-readable message text.
    pub message: String,
}

/// A DNS zone.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Zone {
    /// Zone identifier.
    pub id: String,
    /// Zone name, e.g. `example.com`.
    pub name: String,
}

/// A DNS record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DnsRecord {
    /// Record identifier.
    pub id: String,
    /// Record type, e.g. `A`.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content; for A records the IPv4 address.
    pub content: String,
    /// Whether the record is proxied through the provider.
    #[serde(default)]
    pub proxied: bool,
}

#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

/// Unwraps an envelope into its payload.
///
/// A failed envelope whose first message mentions an existing record maps
/// to [`DnsError::RecordExists`], so callers can treat re-creation as a
/// benign outcome.
///
/// # Errors
///
/// Returns [`DnsError::Provider`] for any other failed envelope.
pub fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, DnsError> {
    if envelope.success {
        envelope.result.ok_or_else(|| DnsError::Decode {
            message: String::from("successful envelope carried no result"),
        })
    } else {
        let message = envelope
            .errors
            .first()
            .map_or_else(|| String::from("unspecified provider error"), |e| e.message.clone());
        if message.to_lowercase().contains("record already exists") {
            Err(DnsError::RecordExists)
        } else {
            Err(DnsError::Provider { message })
        }
    }
}

/// Client for the provider's REST API.
#[derive(Clone, Debug)]
pub struct DnsClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl DnsClient {
    /// Creates a client for the given API base URL and bearer token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    /// Lists the zones visible to the token.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError`] on transport, decoding, or provider failure.
    pub async fn list_zones(&self) -> Result<Vec<Zone>, DnsError> {
        let url = format!("{}/zones", self.base_url);
        let envelope = self.get(&url, &[]).await?;
        unwrap_envelope(envelope)
    }

    /// Creates a proxied A record with automatic TTL.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::RecordExists`] when the record is already
    /// present, and other [`DnsError`] variants on failure.
    pub async fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        ip: &str,
    ) -> Result<DnsRecord, DnsError> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let payload = RecordPayload {
            record_type: "A",
            name,
            content: ip,
            ttl: 1,
            proxied: true,
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| DnsError::Request {
                message: err.to_string(),
            })?;
        let envelope = decode(response).await?;
        unwrap_envelope(envelope)
    }

    /// Lists A records in a zone, optionally filtered by address.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError`] on transport, decoding, or provider failure.
    pub async fn list_records(
        &self,
        zone_id: &str,
        ip: Option<&str>,
    ) -> Result<Vec<DnsRecord>, DnsError> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let mut query: Vec<(&str, &str)> = vec![("type", "A"), ("per_page", "100")];
        if let Some(ip) = ip {
            query.push(("content", ip));
        }
        let envelope = self.get(&url, &query).await?;
        unwrap_envelope(envelope)
    }

    /// Points an existing record at a new address, keeping its proxied
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError`] on transport, decoding, or provider failure.
    pub async fn update_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
        new_ip: &str,
    ) -> Result<DnsRecord, DnsError> {
        let url = format!("{}/zones/{zone_id}/dns_records/{}", self.base_url, record.id);
        let payload = RecordPayload {
            record_type: "A",
            name: &record.name,
            content: new_ip,
            ttl: 1,
            proxied: record.proxied,
        };
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| DnsError::Request {
                message: err.to_string(),
            })?;
        let envelope = decode(response).await?;
        unwrap_envelope(envelope)
    }

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError`] on transport, decoding, or provider failure.
    pub async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), DnsError> {
        let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| DnsError::Request {
                message: err.to_string(),
            })?;
        let envelope: Envelope<serde_json::Value> = decode(response).await?;
        unwrap_envelope(envelope).map(|_| ())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Envelope<T>, DnsError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .query(query)
            .send()
            .await
            .map_err(|err| DnsError::Request {
                message: err.to_string(),
            })?;
        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Envelope<T>, DnsError> {
    response.json().await.map_err(|err| DnsError::Decode {
        message: err.to_string(),
    })
}
