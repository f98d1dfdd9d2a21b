//! Splunk management REST API transport.
//!
//! All requests ask for `output_mode=json`. Searches run as blocking jobs:
//! the job is created, its counters and rows are read, and the job is
//! cancelled so it does not linger on the search head.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use super::transport::{
    ConnectionHandle, Record, SearchOutcome, SearchRequest, SearchStatistics, SearchTransport,
    ServerInfo, TransportError,
};
use crate::Result;
use crate::config::SplunkSettings;
use crate::error::{SplunkMcpError, redact_url};
use crate::security::Credentials;

const LOGIN_PATH: &str = "services/auth/login";
const SERVER_INFO_PATH: &str = "services/server/info";
const INDEXES_PATH: &str = "services/data/indexes";
const JOBS_PATH: &str = "services/search/jobs";
const HTTPAUTH_TOKENS_PATH: &str = "services/authentication/httpauth-tokens";

/// [`SearchTransport`] over the Splunk management port.
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl RestTransport {
    /// Creates a transport for `base_url`.
    ///
    /// # Errors
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(base_url: Url, request_timeout: Duration, verify_tls: bool) -> Result<Self> {
        if !verify_tls {
            tracing::debug!("TLS certificate verification disabled for Splunk connection");
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| {
                SplunkMcpError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    /// Creates a transport from the `splunk` configuration section.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid address.
    pub fn from_settings(settings: &SplunkSettings) -> Result<Self> {
        Self::new(
            settings.base_url()?,
            settings.request_timeout(),
            settings.verify_ssl,
        )
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, TransportError> {
        self.base_url.join(path).map_err(|e| {
            TransportError::InvalidResponse(format!("cannot build URL for {}: {}", path, e))
        })
    }

    fn authorized(&self, builder: RequestBuilder, handle: &ConnectionHandle) -> RequestBuilder {
        builder.header(
            reqwest::header::AUTHORIZATION,
            format!("Splunk {}", handle.session_key()),
        )
    }

    async fn get_json(
        &self,
        handle: &ConnectionHandle,
        url: Url,
        query: &[(&str, String)],
    ) -> std::result::Result<Value, TransportError> {
        let request = self.authorized(self.client.get(url), handle).query(query);
        let response = check_status(request.send().await.map_err(classify)?).await?;
        response.json::<Value>().await.map_err(classify)
    }

    async fn cancel_job(&self, handle: &ConnectionHandle, sid: &str) {
        let url = match self.endpoint(&format!("{}/{}", JOBS_PATH, sid)) {
            Ok(url) => url,
            Err(_) => return,
        };
        let request = self.authorized(self.client.delete(url), handle);
        if let Err(e) = request.send().await {
            tracing::debug!(sid, error = %e, "Failed to cancel finished search job");
        }
    }
}

/// Maps a `reqwest` failure onto the retry classification.
fn classify(error: reqwest::Error) -> TransportError {
    let message = match error.url() {
        Some(url) => format!("{} ({})", error, redact_url(url.as_str())),
        None => error.to_string(),
    };
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() || error.is_request() {
        TransportError::Unreachable(message)
    } else if error.is_decode() || error.is_body() {
        TransportError::InvalidResponse(message)
    } else {
        TransportError::Unreachable(message)
    }
}

/// Turns non-success statuses into [`TransportError`]s.
async fn check_status(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| splunk_messages(&value).into_iter().next())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("no details").to_string()
            } else {
                body.trim().to_string()
            }
        });

    tracing::debug!(status = status.as_u16(), %message, "Splunk request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized(message),
        _ => TransportError::Http {
            status: status.as_u16(),
            message,
        },
    })
}

/// Collects the `text` of every entry in a Splunk `messages` array.
fn splunk_messages(value: &Value) -> Vec<String> {
    value
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| {
                    let text = m.get("text").and_then(Value::as_str)?;
                    Some(match m.get("type").and_then(Value::as_str) {
                        Some(kind) => format!("{}: {}", kind, text),
                        None => text.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Content of the first `entry` of an Atom-style JSON response.
fn first_entry_content(value: &Value) -> Option<&Value> {
    value
        .get("entry")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("content"))
}

fn string_field(content: &Value, key: &str) -> String {
    match content.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "Unknown".to_string(),
    }
}

fn counter(content: &Value, key: &str) -> u64 {
    match content.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn seconds(content: &Value, key: &str) -> f64 {
    match content.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[async_trait]
impl SearchTransport for RestTransport {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<ConnectionHandle, TransportError> {
        let url = self.endpoint(LOGIN_PATH)?;
        tracing::debug!(url = %redact_url(url.as_str()), user = credentials.username(), "Requesting Splunk session key");

        let form = [
            ("username", credentials.username()),
            ("password", credentials.expose_password()),
            ("output_mode", "json"),
        ];
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(classify)?;
        let body: Value = check_status(response).await?.json().await.map_err(classify)?;

        body.get("sessionKey")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(ConnectionHandle::new)
            .ok_or_else(|| {
                TransportError::InvalidResponse("login response has no sessionKey".to_string())
            })
    }

    async fn probe(
        &self,
        handle: &ConnectionHandle,
    ) -> std::result::Result<ServerInfo, TransportError> {
        let url = self.endpoint(SERVER_INFO_PATH)?;
        let body = self
            .get_json(handle, url, &[("output_mode", "json".to_string())])
            .await?;
        let content = first_entry_content(&body).ok_or_else(|| {
            TransportError::InvalidResponse("server info response has no entry".to_string())
        })?;

        Ok(ServerInfo {
            server_name: string_field(content, "serverName"),
            version: string_field(content, "version"),
            build: string_field(content, "build"),
        })
    }

    async fn search(
        &self,
        handle: &ConnectionHandle,
        request: &SearchRequest,
    ) -> std::result::Result<SearchOutcome, TransportError> {
        let fetch_count = request.fetch_count().to_string();
        let max_time = request.max_execution_time.as_secs().to_string();
        let form = [
            ("search", request.query.as_str()),
            ("earliest_time", request.earliest_time.as_str()),
            ("latest_time", request.latest_time.as_str()),
            ("max_count", fetch_count.as_str()),
            ("max_time", max_time.as_str()),
            ("exec_mode", "blocking"),
            ("output_mode", "json"),
        ];

        // Blocking jobs hold the request open until the search completes
        let create = self
            .authorized(self.client.post(self.endpoint(JOBS_PATH)?), handle)
            .timeout(self.request_timeout + request.max_execution_time)
            .form(&form);
        let created: Value = check_status(create.send().await.map_err(classify)?)
            .await?
            .json()
            .await
            .map_err(classify)?;
        let sid = created
            .get("sid")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TransportError::InvalidResponse("job creation response has no sid".to_string())
            })?
            .to_string();
        tracing::debug!(sid = %sid, "Search job completed");

        let outcome = self.collect_job(handle, &sid, &fetch_count).await;
        self.cancel_job(handle, &sid).await;
        outcome
    }

    async fn list_indexes(
        &self,
        handle: &ConnectionHandle,
    ) -> std::result::Result<Vec<String>, TransportError> {
        let url = self.endpoint(INDEXES_PATH)?;
        let body = self
            .get_json(
                handle,
                url,
                &[
                    ("output_mode", "json".to_string()),
                    ("count", "0".to_string()),
                ],
            )
            .await?;

        let entries = body.get("entry").and_then(Value::as_array).ok_or_else(|| {
            TransportError::InvalidResponse("index list response has no entry".to_string())
        })?;
        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn logout(&self, handle: &ConnectionHandle) -> std::result::Result<(), TransportError> {
        let mut url = self.endpoint(HTTPAUTH_TOKENS_PATH)?;
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::InvalidResponse("base URL cannot carry a path".to_string())
            })?
            .push(handle.session_key());

        // The URL carries the session key, so errors are reported without it
        let response = self
            .authorized(self.client.delete(url), handle)
            .send()
            .await
            .map_err(|e| classify(e.without_url()))?;
        check_status(response).await.map(|_| ())
    }
}

impl RestTransport {
    async fn collect_job(
        &self,
        handle: &ConnectionHandle,
        sid: &str,
        fetch_count: &str,
    ) -> std::result::Result<SearchOutcome, TransportError> {
        let job_url = self.endpoint(&format!("{}/{}", JOBS_PATH, sid))?;
        let job = self
            .get_json(handle, job_url, &[("output_mode", "json".to_string())])
            .await?;
        let content = first_entry_content(&job).ok_or_else(|| {
            TransportError::InvalidResponse(format!("job {} status has no entry", sid))
        })?;

        if content.get("isFailed").and_then(Value::as_bool) == Some(true) {
            let reason = content
                .get("messages")
                .and_then(|m| m.get("fatal").or_else(|| m.get("error")))
                .and_then(Value::as_array)
                .and_then(|list| list.first())
                .and_then(Value::as_str)
                .unwrap_or("search job failed")
                .to_string();
            return Err(TransportError::SearchFailed(reason));
        }

        let statistics = SearchStatistics {
            event_count: counter(content, "eventCount"),
            scan_count: counter(content, "scanCount"),
            result_count: counter(content, "resultCount"),
            run_duration: seconds(content, "runDuration"),
        };

        let results_url = self.endpoint(&format!("{}/{}/results", JOBS_PATH, sid))?;
        let body = self
            .get_json(
                handle,
                results_url,
                &[
                    ("output_mode", "json".to_string()),
                    ("count", fetch_count.to_string()),
                ],
            )
            .await?;

        let records: Vec<Record> = body
            .get("results")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchOutcome {
            records,
            statistics,
            messages: splunk_messages(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_splunk_messages() {
        let value = json!({"messages": [
            {"type": "WARN", "text": "Search truncated"},
            {"text": "untyped"},
            {"type": "INFO"}
        ]});
        assert_eq!(
            splunk_messages(&value),
            vec!["WARN: Search truncated".to_string(), "untyped".to_string()]
        );
        assert!(splunk_messages(&json!({})).is_empty());
    }

    #[test]
    fn test_counters_accept_numbers_and_strings() {
        let content = json!({"eventCount": 12, "scanCount": "340", "runDuration": "1.5"});
        assert_eq!(counter(&content, "eventCount"), 12);
        assert_eq!(counter(&content, "scanCount"), 340);
        assert_eq!(counter(&content, "resultCount"), 0);
        assert!((seconds(&content, "runDuration") - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_string_field_fallback() {
        let content = json!({"serverName": "sh01", "build": 12345});
        assert_eq!(string_field(&content, "serverName"), "sh01");
        assert_eq!(string_field(&content, "build"), "12345");
        assert_eq!(string_field(&content, "version"), "Unknown");
    }

    #[test]
    fn test_endpoint_join() {
        let transport = RestTransport::new(
            Url::parse("https://splunk.local:8089/").unwrap(),
            Duration::from_secs(5),
            false,
        )
        .unwrap();
        assert_eq!(
            transport.endpoint(LOGIN_PATH).unwrap().as_str(),
            "https://splunk.local:8089/services/auth/login"
        );
    }
}
