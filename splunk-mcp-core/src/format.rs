//! JSON documents returned by the tool surface.
//!
//! Every builder returns a `serde_json::Value` tagged with a `type` and a
//! `status`, plus an RFC 3339 timestamp. Query responses carry statistics,
//! pagination metadata, field and event summaries, and either the full page
//! or a preview.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::SplunkMcpError;
use crate::pager::{PREVIEW_CAP, PageResult};
use crate::session::{ConnectionStatus, Record, SearchOutcome};

/// Records inspected when building the field summary.
const FIELD_SUMMARY_SAMPLE: usize = 100;

/// Distinct sample values kept per field.
const SAMPLE_VALUES_PER_FIELD: usize = 5;

/// Entries in each top-N list.
const TOP_N: usize = 5;

/// Fields checked, in order, for a severity distribution.
const SEVERITY_FIELDS: [&str; 3] = ["severity", "level", "log_level"];

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Renders a JSON value the way Splunk results are displayed.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Counts occurrences, most frequent first; ties keep first-seen order.
fn tally(values: impl IntoIterator<Item = String>) -> Vec<(String, usize)> {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for value in values {
        match index.get(&value) {
            Some(&slot) => order[slot].1 += 1,
            None => {
                index.insert(value.clone(), order.len());
                order.push((value, 1));
            }
        }
    }
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

/// Query text and time range echoed back in query responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext<'a> {
    /// Query as the caller wrote it, after unescaping
    pub query: &'a str,
    /// Effective earliest time
    pub earliest_time: &'a str,
    /// Effective latest time
    pub latest_time: &'a str,
}

/// Health check response.
pub fn connection_response(status: &ConnectionStatus) -> Value {
    if status.ok {
        json!({
            "type": "connection_status",
            "status": "connected",
            "timestamp": timestamp(),
            "latency_ms": status.latency_ms,
            "server_info": status.server_info,
            "available_indexes": status.indexes,
            "message": "Successfully connected to Splunk",
        })
    } else {
        json!({
            "type": "connection_status",
            "status": "error",
            "timestamp": timestamp(),
            "latency_ms": status.latency_ms,
            "error": status.error.as_deref().unwrap_or("Unknown error"),
            "error_kind": status.error_kind,
            "message": "Failed to connect to Splunk",
        })
    }
}

/// Successful query response.
///
/// `outcome.records` must be the same rows `page` was built from; summaries
/// cover the rows kept after truncation.
pub fn query_response(
    context: &QueryContext<'_>,
    outcome: &SearchOutcome,
    page: &PageResult<Record>,
    include_raw: bool,
) -> Value {
    let kept = &outcome.records[..page.total_count.min(outcome.records.len())];
    let stats = &outcome.statistics;

    let mut response = json!({
        "type": "query_results",
        "status": "success",
        "query": context.query,
        "timestamp": timestamp(),
        "time_range": {
            "earliest": context.earliest_time,
            "latest": context.latest_time,
        },
        "statistics": {
            "total_events": stats.event_count,
            "total_results": page.total_count,
            "scan_count": stats.scan_count,
            "execution_time": format!("{:.2}s", stats.run_duration),
        },
        "pagination": {
            "total_results": page.total_count,
            "page_size": page.page_size,
            "total_pages": page.total_pages(),
            "requires_pagination": page.total_pages() > 1,
            "has_more": page.has_more,
            "truncated": page.truncated,
        },
        "field_summary": field_summary(kept),
        "event_summary": event_summary(kept),
    });

    if let Some(body) = response.as_object_mut() {
        if let Some(rows) = page.full_page() {
            if include_raw {
                body.insert("results".to_string(), json!(clean_records(rows)));
            }
            let message = if page.truncated {
                format!(
                    "Query completed with {} results (limited by max_results)",
                    page.total_count
                )
            } else {
                format!("Query completed with {} results", page.total_count)
            };
            body.insert("message".to_string(), json!(message));
        } else {
            body.insert(
                "results_preview".to_string(),
                json!(clean_records(&page.preview)),
            );
            body.insert(
                "message".to_string(),
                json!(format!(
                    "Query returned {} results (exceeds page size of {}). Showing preview of first {} results. \
                     Use pagination or refine your query for complete results.",
                    page.total_count,
                    page.page_size,
                    page.preview.len().min(PREVIEW_CAP)
                )),
            );
            body.insert(
                "pagination_guidance".to_string(),
                json!({
                    "total_pages": page.total_pages(),
                    "results_per_page": page.page_size,
                    "suggestion": "Consider adding filters or time constraints to reduce result set",
                }),
            );
        }

        if !outcome.messages.is_empty() {
            body.insert("splunk_messages".to_string(), json!(outcome.messages));
        }
    }

    response
}

/// Error category used to pick troubleshooting tips.
pub fn error_category(error: &SplunkMcpError) -> &'static str {
    match error.kind() {
        "timeout" => "timeout",
        "connection" | "authentication" | "session_expired" => "http_error",
        "wrong_machine" | "corrupt_credential" | "fingerprint" => "credential_error",
        _ => "general_error",
    }
}

/// Suggestions shown next to an error of `category`.
pub fn troubleshooting_tips(category: &str) -> &'static [&'static str] {
    match category {
        "timeout" => &[
            "Query took too long to execute",
            "Try reducing the time range",
            "Add more specific filters to reduce data volume",
            "Consider using summary indexes for large datasets",
        ],
        "http_error" => &[
            "Check your network connectivity",
            "Verify Splunk server is accessible",
            "Ensure credentials are correct",
            "Check if your account has necessary permissions",
        ],
        "credential_error" => &[
            "Encrypted passwords only work on the machine that encrypted them",
            "Run `splunk-mcp encrypt-password` on this machine",
            "Replace password_encrypted, password_salt and machine_hash in the configuration",
        ],
        _ => &[
            "Verify query syntax is correct",
            "Check if specified indexes exist",
            "Ensure you have permissions for the requested data",
            "Try a simpler query to test connectivity",
        ],
    }
}

/// Failed query response.
pub fn query_error_response(query: &str, error: &SplunkMcpError) -> Value {
    let category = error_category(error);
    json!({
        "type": "query_error",
        "status": "error",
        "query": query,
        "timestamp": timestamp(),
        "error": {
            "message": error.to_string(),
            "kind": error.kind(),
            "type": category,
        },
        "troubleshooting": troubleshooting_tips(category),
    })
}

/// Failure of any other tool.
pub fn tool_error_response(tool: &str, error: &SplunkMcpError) -> Value {
    let message = match error.kind() {
        "configuration" => format!("Invalid parameters or configuration: {}", error),
        "connection" | "authentication" => {
            "Failed to connect to Splunk. Check your configuration and network.".to_string()
        }
        "wrong_machine" | "corrupt_credential" | "fingerprint" => {
            "Stored credentials cannot be used on this machine.".to_string()
        }
        _ => format!("Failed to execute {}: {}", tool, error),
    };
    json!({
        "status": "error",
        "tool": tool,
        "timestamp": timestamp(),
        "error": error.to_string(),
        "kind": error.kind(),
        "message": message,
        "troubleshooting": troubleshooting_tips(error_category(error)),
    })
}

/// Index listing response.
pub fn indexes_response(indexes: &[String]) -> Value {
    json!({
        "type": "indexes_list",
        "status": "success",
        "timestamp": timestamp(),
        "total_indexes": indexes.len(),
        "indexes": indexes,
        "message": format!("Found {} indexes", indexes.len()),
    })
}

/// Sourcetype listing response.
pub fn sourcetypes_response(sourcetypes: &[String], index: Option<&str>) -> Value {
    let message = match index {
        Some(index) => format!(
            "Found {} sourcetypes in index '{}'",
            sourcetypes.len(),
            index
        ),
        None => format!("Found {} sourcetypes", sourcetypes.len()),
    };
    let mut response = json!({
        "type": "sourcetypes_list",
        "status": "success",
        "timestamp": timestamp(),
        "total_sourcetypes": sourcetypes.len(),
        "sourcetypes": sourcetypes,
        "message": message,
    });
    if let (Some(index), Some(body)) = (index, response.as_object_mut()) {
        body.insert("index".to_string(), json!(index));
    }
    response
}

/// Environment lookup response.
pub fn environment_index_response(environment: &str, index: &str) -> Value {
    json!({
        "type": "environment_index",
        "status": "success",
        "environment": environment,
        "timestamp": timestamp(),
        "index": index,
        "message": format!("Index for {} environment: {}", environment.to_uppercase(), index),
    })
}

/// Per-field samples, cardinality and top values over the first records.
///
/// Fields starting with `_` are Splunk internals and are skipped.
pub fn field_summary(records: &[Record]) -> Value {
    let mut fields: HashMap<&str, Vec<String>> = HashMap::new();
    for record in records.iter().take(FIELD_SUMMARY_SAMPLE) {
        for (field, value) in record {
            if field.starts_with('_') {
                continue;
            }
            fields
                .entry(field.as_str())
                .or_default()
                .push(display_value(value));
        }
    }

    let mut summary = serde_json::Map::new();
    for (field, values) in fields {
        let mut samples: Vec<&String> = Vec::new();
        for value in &values {
            if samples.len() == SAMPLE_VALUES_PER_FIELD {
                break;
            }
            if !samples.contains(&value) {
                samples.push(value);
            }
        }
        let counts = tally(values.iter().cloned());
        let top: Vec<Value> = counts
            .iter()
            .take(TOP_N)
            .map(|(value, count)| json!({"value": value, "count": count}))
            .collect();
        summary.insert(
            field.to_string(),
            json!({
                "sample_values": samples,
                "unique_count": counts.len(),
                "top_values": top,
            }),
        );
    }
    Value::Object(summary)
}

fn column<'a>(records: &'a [Record], field: &'a str) -> Option<impl Iterator<Item = String> + 'a> {
    records.iter().any(|r| r.contains_key(field)).then(|| {
        records.iter().map(move |r| {
            r.get(field)
                .map_or_else(|| "unknown".to_string(), display_value)
        })
    })
}

/// Host, source, sourcetype and severity distributions.
pub fn event_summary(records: &[Record]) -> Value {
    if records.is_empty() {
        return json!({});
    }
    let mut summary = serde_json::Map::new();
    summary.insert("total_events".to_string(), json!(records.len()));

    if let Some(hosts) = column(records, "host") {
        let counts = tally(hosts);
        summary.insert("unique_hosts".to_string(), json!(counts.len()));
        summary.insert(
            "top_hosts".to_string(),
            counts
                .iter()
                .take(TOP_N)
                .map(|(host, count)| json!({"host": host, "count": count}))
                .collect(),
        );
    }

    if let Some(sources) = column(records, "source") {
        let counts = tally(sources);
        summary.insert("unique_sources".to_string(), json!(counts.len()));
        summary.insert(
            "top_sources".to_string(),
            counts
                .iter()
                .take(TOP_N)
                .map(|(source, count)| json!({"source": source, "count": count}))
                .collect(),
        );
    }

    if let Some(sourcetypes) = column(records, "sourcetype") {
        summary.insert(
            "sourcetypes".to_string(),
            tally(sourcetypes)
                .iter()
                .map(|(st, count)| json!({"sourcetype": st, "count": count}))
                .collect(),
        );
    }

    if let Some(levels) = SEVERITY_FIELDS
        .iter()
        .find_map(|field| column(records, field))
    {
        summary.insert(
            "severity_distribution".to_string(),
            tally(levels)
                .iter()
                .map(|(level, count)| json!({"level": level, "count": count}))
                .collect(),
        );
    }

    Value::Object(summary)
}

/// Drops Splunk internal fields, keeping `_time` and `_raw`.
///
/// When a row has neither `_raw` nor `message`, the remaining internal fields
/// are kept so the row is not left without context.
pub fn clean_record(record: &Record) -> Record {
    let has_text = record.contains_key("_raw") || record.contains_key("message");
    record
        .iter()
        .filter(|(field, _)| {
            !field.starts_with('_') || matches!(field.as_str(), "_time" | "_raw") || !has_text
        })
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

fn clean_records(records: &[Record]) -> Vec<Record> {
    records.iter().map(clean_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::paginate;
    use crate::session::SearchStatistics;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn events(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| {
                record(json!({
                    "_time": format!("2024-01-01T00:00:{:02}", i % 60),
                    "_raw": format!("event {}", i),
                    "_cd": "1:2",
                    "host": if i % 3 == 0 { "web01" } else { "web02" },
                    "sourcetype": "access_combined",
                    "status": if i % 2 == 0 { 200 } else { 500 },
                }))
            })
            .collect()
    }

    fn outcome(records: Vec<Record>) -> SearchOutcome {
        SearchOutcome {
            records,
            statistics: SearchStatistics {
                event_count: 42,
                scan_count: 100,
                result_count: 0,
                run_duration: 1.234,
            },
            messages: vec!["WARN: truncated".to_string()],
        }
    }

    fn context() -> QueryContext<'static> {
        QueryContext {
            query: "search index=web",
            earliest_time: "-1h",
            latest_time: "now",
        }
    }

    #[test]
    fn test_tally_orders_by_count_then_first_seen() {
        let counts = tally(["b", "a", "a", "c", "b", "a"].map(String::from));
        assert_eq!(
            counts,
            vec![("a".to_string(), 3), ("b".to_string(), 2), ("c".to_string(), 1)]
        );
        let ties = tally(["x", "y"].map(String::from));
        assert_eq!(ties[0].0, "x");
    }

    #[test]
    fn test_field_summary_skips_internal_fields() {
        let summary = field_summary(&events(10));
        assert!(summary.get("_raw").is_none());
        assert!(summary.get("_time").is_none());
        assert_eq!(summary["host"]["unique_count"], 2);
        assert_eq!(summary["host"]["top_values"][0]["value"], "web02");
        assert_eq!(summary["host"]["top_values"][0]["count"], 6);
        assert_eq!(summary["status"]["sample_values"], json!(["200", "500"]));
    }

    #[test]
    fn test_field_summary_samples_first_hundred_records() {
        let summary = field_summary(&events(250));
        let total: u64 = summary["sourcetype"]["top_values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_event_summary() {
        let mut rows = events(6);
        rows.push(record(json!({"_raw": "no host", "level": "ERROR"})));
        let summary = event_summary(&rows);

        assert_eq!(summary["total_events"], 7);
        assert_eq!(summary["unique_hosts"], 3);
        assert_eq!(summary["top_hosts"][0]["host"], "web02");
        assert_eq!(summary["sourcetypes"][0]["sourcetype"], "access_combined");
        assert!(summary.get("top_sources").is_none());
        assert_eq!(summary["severity_distribution"][0]["level"], "unknown");
        assert_eq!(summary["severity_distribution"][1]["level"], "ERROR");
        assert_eq!(event_summary(&[]), json!({}));
    }

    #[test]
    fn test_clean_record() {
        let row = record(json!({"_time": "t", "_raw": "r", "_cd": "1", "host": "h"}));
        let cleaned = clean_record(&row);
        assert!(cleaned.contains_key("_time"));
        assert!(cleaned.contains_key("_raw"));
        assert!(!cleaned.contains_key("_cd"));

        let stats_row = record(json!({"count": 5, "_span": "3600"}));
        assert!(clean_record(&stats_row).contains_key("_span"));
    }

    #[test]
    fn test_query_response_single_page() {
        let outcome = outcome(events(20));
        let page = paginate(outcome.records.clone(), 1000, 10_000).unwrap();
        let response = query_response(&context(), &outcome, &page, true);

        assert_eq!(response["type"], "query_results");
        assert_eq!(response["statistics"]["total_results"], 20);
        assert_eq!(response["statistics"]["execution_time"], "1.23s");
        assert_eq!(response["pagination"]["total_pages"], 1);
        assert_eq!(response["results"].as_array().unwrap().len(), 20);
        assert!(response.get("results_preview").is_none());
        assert!(response["results"][0].get("_cd").is_none());
        assert_eq!(response["splunk_messages"][0], "WARN: truncated");
        assert_eq!(response["time_range"]["earliest"], "-1h");
    }

    #[test]
    fn test_query_response_without_raw_events() {
        let outcome = outcome(events(5));
        let page = paginate(outcome.records.clone(), 1000, 10_000).unwrap();
        let response = query_response(&context(), &outcome, &page, false);
        assert!(response.get("results").is_none());
        assert_eq!(response["message"], "Query completed with 5 results");
    }

    #[test]
    fn test_query_response_preview() {
        let outcome = outcome(events(2500));
        let page = paginate(outcome.records.clone(), 1000, 10_000).unwrap();
        let response = query_response(&context(), &outcome, &page, true);

        assert!(response.get("results").is_none());
        assert_eq!(response["results_preview"].as_array().unwrap().len(), 100);
        assert_eq!(response["pagination"]["total_pages"], 3);
        assert_eq!(response["pagination"]["requires_pagination"], true);
        assert_eq!(response["pagination_guidance"]["results_per_page"], 1000);
        assert_eq!(response["event_summary"]["total_events"], 2500);
    }

    #[test]
    fn test_error_responses() {
        let error = SplunkMcpError::Connection {
            attempts: 3,
            reason: "refused".to_string(),
        };
        let response = query_error_response("search index=x", &error);
        assert_eq!(response["error"]["kind"], "connection");
        assert_eq!(response["error"]["type"], "http_error");
        assert_eq!(response["troubleshooting"][0], "Check your network connectivity");

        let response = tool_error_response("check_connection", &SplunkMcpError::WrongMachine);
        assert_eq!(response["kind"], "wrong_machine");
        assert_eq!(response["tool"], "check_connection");
        assert!(
            response["troubleshooting"][1]
                .as_str()
                .unwrap()
                .contains("encrypt-password")
        );
    }

    #[test]
    fn test_listing_responses() {
        let indexes = vec!["main".to_string(), "app_uat".to_string()];
        assert_eq!(indexes_response(&indexes)["total_indexes"], 2);

        let sourcetypes = vec!["syslog".to_string()];
        let response = sourcetypes_response(&sourcetypes, Some("main"));
        assert_eq!(response["index"], "main");
        assert_eq!(response["message"], "Found 1 sourcetypes in index 'main'");
        assert!(sourcetypes_response(&sourcetypes, None).get("index").is_none());

        let response = environment_index_response("uat", "app_uat");
        assert_eq!(response["message"], "Index for UAT environment: app_uat");
    }

    #[test]
    fn test_connection_response() {
        let status = ConnectionStatus {
            ok: false,
            latency_ms: 12,
            server_info: None,
            indexes: Vec::new(),
            error: Some("refused".to_string()),
            error_kind: Some("connection"),
        };
        let response = connection_response(&status);
        assert_eq!(response["status"], "error");
        assert_eq!(response["error"], "refused");
        assert_eq!(response["message"], "Failed to connect to Splunk");
    }
}
