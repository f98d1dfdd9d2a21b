//! Tool dispatch for the MCP surface.
//!
//! Each tool call produces a JSON document built by
//! [`splunk_mcp_core::format`]. Failures are returned as JSON error bodies
//! tagged with the error kind; only an unknown tool name is reported as a
//! protocol-level error by the server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use splunk_mcp_core::format::{self, QueryContext};
use splunk_mcp_core::session::{ConnectionStatus, SearchRequest, SearchTransport};
use splunk_mcp_core::config::MAX_RESULTS_LIMIT;
use splunk_mcp_core::{Config, Result, SharedSession, SplunkMcpError, paginate};

/// Time range used when listing sourcetypes.
const SOURCETYPE_EARLIEST: &str = "-7d";

/// Row limit for sourcetype listings.
const SOURCETYPE_LIMIT: usize = 1000;

/// Resource URI of the sanitized configuration.
pub const CONFIG_RESOURCE: &str = "splunk://config";

/// Resource URI of the environment to index map.
pub const ENVIRONMENTS_RESOURCE: &str = "splunk://environments";

/// A tool name the dispatcher does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub String);

#[derive(Debug, Deserialize)]
struct EnvironmentArgs {
    environment: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    earliest_time: Option<String>,
    latest_time: Option<String>,
    max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SourcetypeArgs {
    index: Option<String>,
}

fn parse_args<A: DeserializeOwned>(arguments: &Value) -> Result<A> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments)
        .map_err(|e| SplunkMcpError::configuration(format!("Invalid arguments: {}", e)))
}

/// Undoes the double escaping some clients apply to quotes.
pub fn unescape_query(query: &str) -> String {
    query.replace("\\\"", "\"")
}

/// Tool and resource handlers sharing one Splunk session.
pub struct ToolDispatcher<T: SearchTransport> {
    config: Arc<Config>,
    session: SharedSession<T>,
}

impl<T: SearchTransport> Clone for ToolDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            session: Arc::clone(&self.session),
        }
    }
}

impl<T: SearchTransport> ToolDispatcher<T> {
    /// Creates a dispatcher over a loaded configuration and shared session.
    pub fn new(config: Arc<Config>, session: SharedSession<T>) -> Self {
        Self { config, session }
    }

    /// Session shared by every tool call.
    pub fn session(&self) -> &SharedSession<T> {
        &self.session
    }

    /// Deadline for a whole tool call: the server-side search limit plus one
    /// request timeout for the surrounding round trips.
    pub fn call_deadline(&self) -> Duration {
        self.config.query_settings.execution_deadline() + self.config.splunk.request_timeout()
    }

    async fn bounded<R>(&self, operation: impl Future<Output = Result<R>>) -> Result<R> {
        let deadline = self.call_deadline();
        tokio::time::timeout(deadline, operation)
            .await
            .unwrap_or_else(|_| Err(SplunkMcpError::Timeout(deadline)))
    }

    /// Runs tool `name` and returns its JSON document.
    ///
    /// # Errors
    /// Returns [`UnknownTool`] for a name not listed by [`tool_definitions`].
    pub async fn call(&self, name: &str, arguments: &Value) -> std::result::Result<Value, UnknownTool> {
        tracing::info!(tool = name, "Executing tool");
        let response = match name {
            "get_index_for_environment" => self.get_index_for_environment(arguments),
            "check_connection" => Ok(self.check_connection().await),
            "execute_query" => return Ok(self.execute_query(arguments).await),
            "get_available_indexes" => self.get_available_indexes().await,
            "get_sourcetypes" => self.get_sourcetypes(arguments).await,
            other => return Err(UnknownTool(other.to_string())),
        };
        Ok(response.unwrap_or_else(|e| {
            tracing::error!(tool = name, kind = e.kind(), error = %e, "Tool failed");
            format::tool_error_response(name, &e)
        }))
    }

    fn get_index_for_environment(&self, arguments: &Value) -> Result<Value> {
        let args: EnvironmentArgs = parse_args(arguments)?;
        let index = self.config.index_for_environment(&args.environment)?;
        Ok(format::environment_index_response(&args.environment, index))
    }

    async fn check_connection(&self) -> Value {
        let outcome = self
            .bounded(async { Ok(self.session.lock().await.check_connection().await) })
            .await;
        let status = outcome.unwrap_or_else(|e| ConnectionStatus {
            ok: false,
            latency_ms: u64::try_from(self.call_deadline().as_millis()).unwrap_or(u64::MAX),
            server_info: None,
            indexes: Vec::new(),
            error: Some(e.to_string()),
            error_kind: Some(e.kind()),
        });
        format::connection_response(&status)
    }

    async fn execute_query(&self, arguments: &Value) -> Value {
        let args: QueryArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return format::tool_error_response("execute_query", &e),
        };
        let query = unescape_query(&args.query);
        match self.run_query(&query, args).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, "Query failed");
                format::query_error_response(&query, &e)
            }
        }
    }

    async fn run_query(&self, query: &str, args: QueryArgs) -> Result<Value> {
        let settings = &self.config.query_settings;
        if query.trim().is_empty() {
            return Err(SplunkMcpError::configuration("query must not be empty"));
        }
        let max_results = args.max_results.unwrap_or(settings.max_results);
        if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
            return Err(SplunkMcpError::configuration(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
        let earliest_time = args
            .earliest_time
            .unwrap_or_else(|| settings.default_earliest_time.clone());
        let latest_time = args
            .latest_time
            .unwrap_or_else(|| settings.default_latest_time.clone());

        if settings.log_queries {
            tracing::info!(%query, %earliest_time, %latest_time, max_results, "Executing query");
        }

        let request = SearchRequest::new(query, &earliest_time, &latest_time, max_results)
            .with_max_execution_time(settings.execution_deadline());
        let outcome = self
            .bounded(async { self.session.lock().await.execute(&request).await })
            .await?;

        let page = paginate(outcome.records.iter().cloned(), settings.page_size, max_results)?;
        let context = QueryContext {
            query,
            earliest_time: &earliest_time,
            latest_time: &latest_time,
        };
        Ok(format::query_response(
            &context,
            &outcome,
            &page,
            settings.include_raw_events,
        ))
    }

    async fn get_available_indexes(&self) -> Result<Value> {
        let indexes = self
            .bounded(async { self.session.lock().await.list_indexes().await })
            .await?;
        Ok(format::indexes_response(&indexes))
    }

    async fn get_sourcetypes(&self, arguments: &Value) -> Result<Value> {
        let args: SourcetypeArgs = parse_args(arguments)?;
        let index = args.index.as_deref().filter(|i| !i.trim().is_empty());
        let query = match index {
            Some(index) => format!("| metadata type=sourcetypes index={}", index),
            None => "| metadata type=sourcetypes".to_string(),
        };
        let request = SearchRequest::new(&query, SOURCETYPE_EARLIEST, "now", SOURCETYPE_LIMIT)
            .with_max_execution_time(self.config.query_settings.execution_deadline());
        let outcome = self
            .bounded(async { self.session.lock().await.execute(&request).await })
            .await?;

        let sourcetypes: Vec<String> = outcome
            .records
            .iter()
            .take(SOURCETYPE_LIMIT)
            .filter_map(|row| row.get("sourcetype").and_then(Value::as_str))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(format::sourcetypes_response(&sourcetypes, index))
    }

    /// Reads a resource by URI.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown URI.
    pub fn read_resource(&self, uri: &str) -> Result<Value> {
        match uri {
            CONFIG_RESOURCE => self.config.sanitized(),
            ENVIRONMENTS_RESOURCE => Ok(self
                .config
                .indexes
                .iter()
                .map(|(environment, index)| (environment.clone(), json!({ "index": index })))
                .collect::<serde_json::Map<_, _>>()
                .into()),
            other => Err(SplunkMcpError::configuration(format!(
                "Unknown resource: {}",
                other
            ))),
        }
    }
}

/// Resources listed by `resources/list`.
pub fn resource_definitions() -> Value {
    json!([
        {
            "uri": CONFIG_RESOURCE,
            "name": "Current Configuration",
            "description": "View current Splunk MCP configuration (sanitized)",
            "mimeType": "application/json",
        },
        {
            "uri": ENVIRONMENTS_RESOURCE,
            "name": "Available Environments",
            "description": "List configured Splunk environments",
            "mimeType": "application/json",
        },
    ])
}

/// Tools listed by `tools/list`, with their input schemas.
pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "get_index_for_environment",
            "description": "Get the index name for a specific environment (UAT or PROD). Use this first to determine which index to use for your queries.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "environment": {
                        "type": "string",
                        "description": "Environment to get index for (uat or prod)",
                        "enum": ["uat", "prod"],
                    },
                },
                "required": ["environment"],
            },
        },
        {
            "name": "check_connection",
            "description": "Check connection status to Splunk server. Returns server info and available indexes.",
            "inputSchema": { "type": "object", "properties": {}, "required": [] },
        },
        {
            "name": "execute_query",
            "description": "Execute a Splunk SPL query. Use the index from get_index_for_environment. To filter by sourcetype, first use get_sourcetypes, then add 'sourcetype=<name>' to the query. Supports time ranges and pagination.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SPL query to execute (e.g. 'index=app_prod sourcetype=access_combined status=500')",
                    },
                    "earliest_time": {
                        "type": "string",
                        "description": "Earliest time for search (e.g. '-2d', '-7d', '2024-01-01T00:00:00')",
                        "default": "-30d",
                    },
                    "latest_time": {
                        "type": "string",
                        "description": "Latest time for search (e.g. 'now', '-1h', '2024-01-01T23:59:59')",
                        "default": "now",
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results to return (default from config)",
                        "minimum": 1,
                        "maximum": MAX_RESULTS_LIMIT,
                    },
                },
                "required": ["query"],
            },
        },
        {
            "name": "get_available_indexes",
            "description": "Get list of all available indexes in Splunk.",
            "inputSchema": { "type": "object", "properties": {}, "required": [] },
        },
        {
            "name": "get_sourcetypes",
            "description": "Get list of available sourcetypes from Splunk, optionally filtered by index.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "index": {
                        "type": "string",
                        "description": "Optional index to filter sourcetypes",
                    },
                },
                "required": [],
            },
        },
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_query() {
        assert_eq!(
            unescape_query(r#"index=main message=\"disk full\""#),
            r#"index=main message="disk full""#
        );
        assert_eq!(unescape_query("index=main"), "index=main");
    }

    #[test]
    fn test_tool_definitions_names() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "get_index_for_environment",
                "check_connection",
                "execute_query",
                "get_available_indexes",
                "get_sourcetypes",
            ]
        );
        assert_eq!(
            tools[2]["inputSchema"]["properties"]["max_results"]["maximum"],
            50_000
        );
    }

    #[test]
    fn test_null_arguments_parse_as_empty() {
        let args: SourcetypeArgs = parse_args(&Value::Null).unwrap();
        assert!(args.index.is_none());
        let missing = parse_args::<QueryArgs>(&json!({})).unwrap_err();
        assert_eq!(missing.kind(), "configuration");
    }
}
