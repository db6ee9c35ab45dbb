//! Hook entry point invoked by the assistant.
//!
//! Reads the hook JSON from stdin and posts it to this session's server:
//!
//! ```text
//! stdin {"session_id", "hook_event_name", ...}
//!   + argv  --announce=0.6 --no-effect      -> arguments {"announce": 0.6, "no_effect": true}
//!   + env   CC_HOOKS_PORT, CC_INSTANCE_ID   -> POST http://127.0.0.1:{port}/events
//! ```
//!
//! Submission is fire-and-forget: a 200 means the event is durably queued,
//! nothing more.

use cc_hooks_protocol::{
    ErrorResponse, SubmitEventRequest, SubmitEventResponse, BASE_PORT, DEFAULT_HOST,
    INSTANCE_ENV, PORT_ENV,
};
use serde_json::{Map, Number, Value};
use std::io::{self, Read};
use std::time::Duration;

const SUBMIT_TIMEOUT_SECS: u64 = 5;

/// Where to send the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
}

impl Target {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let instance_id = lookup(INSTANCE_ENV)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                format!(
                    "{} is not set; start the session with `cc-hook launch` or `cc-hook run`",
                    INSTANCE_ENV
                )
            })?;
        let port = match lookup(PORT_ENV) {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| format!("Invalid {}: {}", PORT_ENV, raw))?,
            _ => BASE_PORT,
        };
        Ok(Self {
            host: DEFAULT_HOST.to_string(),
            port,
            instance_id,
        })
    }
}

pub fn run(extra_args: &[String]) -> Result<(), String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;
    if input.trim().is_empty() {
        return Err("No hook input on stdin".to_string());
    }

    let data: Value =
        serde_json::from_str(&input).map_err(|e| format!("Failed to parse hook input: {}", e))?;
    let arguments = parse_arguments(extra_args)?;
    let target = Target::from_lookup(|key| std::env::var(key).ok())?;

    let response = submit(&target, data, arguments)?;
    tracing::debug!(
        event_id = response.event_id,
        port = target.port,
        instance_id = %target.instance_id,
        "Server accepted event"
    );
    Ok(())
}

/// Converts `--key=value` and bare `--flag` arguments into the `arguments`
/// map. Dashes in keys become underscores; values that look like booleans or
/// numbers are typed accordingly.
pub fn parse_arguments(args: &[String]) -> Result<Option<Map<String, Value>>, String> {
    let mut map = Map::new();
    for arg in args {
        let Some(body) = arg.strip_prefix("--") else {
            return Err(format!("Unexpected argument: {}", arg));
        };
        let (key, value) = match body.split_once('=') {
            Some((key, raw)) => (key, typed_value(raw)),
            None => (body, Value::Bool(true)),
        };
        if key.is_empty() {
            return Err(format!("Unexpected argument: {}", arg));
        }
        map.insert(key.replace('-', "_"), value);
    }
    Ok(if map.is_empty() { None } else { Some(map) })
}

fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

pub fn submit(
    target: &Target,
    data: Value,
    arguments: Option<Map<String, Value>>,
) -> Result<SubmitEventResponse, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(SUBMIT_TIMEOUT_SECS))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let request = SubmitEventRequest {
        data,
        arguments,
        instance_id: Some(target.instance_id.clone()),
    };
    let url = format!("http://{}:{}/events", target.host, target.port);

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .map_err(|e| format!("Failed to reach cc-hooks server at {}: {}", url, e))?;
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .map_err(|e| format!("Failed to decode server response: {}", e));
    }

    let detail = response
        .json::<ErrorResponse>()
        .map(|body| format!("{}: {}", body.error.code, body.error.message))
        .unwrap_or_else(|_| "no error body".to_string());
    Err(format!("Server rejected event ({}): {}", status.as_u16(), detail))
}
