//! # Capability Registry
//!
//! A capability is a named operation the language model may call: a
//! personal-data lookup, a search, a recommendation or a follow action. Each
//! one declares its arguments in a [`CapabilityDescriptor`] and is registered
//! once at startup; the registry is immutable afterwards and shared via `Arc`.
//!
//! ## Invocation contract
//!
//! [`CapabilityRegistry::execute`] always returns a [`CapabilityResult`]:
//!
//! | Situation | `ok` | `error_kind` | text |
//! |-----------|------|--------------|------|
//! | success | true | – | output, or the "no results" sentinel when blank |
//! | unknown name | false | `capability_not_found` | list of available names |
//! | bad args / failure / panic / timeout | false | `execution_error` | apologetic message |
//! | referenced song missing locally | false | `entity_not_found_locally` | reference + marker |
//!
//! Every invocation runs on its own named worker thread and the caller waits
//! at most the configured timeout. Work that overruns is abandoned, not
//! cancelled.

use crate::error::{CapabilityFailure, EntityReference};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Marker that opens the text of an entity-not-found result.
pub const ENTITY_NOT_FOUND_MARKER: &str = "EntityNotFoundLocally";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    const fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParamSpec {
    #[must_use]
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    #[must_use]
    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        default: Option<Value>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
            description,
        }
    }

    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self.kind, value) {
            (ParamKind::String, Value::String(s)) => Some(Value::String(s.clone())),
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::Integer, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
                .map(Value::from),
            (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        }
    }
}

/// Static description of a capability.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Changes user state; never retried automatically.
    pub mutating: bool,
    /// A successful result is the final reply, unchanged.
    pub verbatim: bool,
    /// Capability to re-dispatch to when a referenced song is missing locally.
    pub fallback: Option<&'static str>,
}

impl CapabilityDescriptor {
    #[must_use]
    pub fn new(name: &'static str, description: &'static str, params: Vec<ParamSpec>) -> Self {
        Self {
            name,
            description,
            params,
            mutating: false,
            verbatim: false,
            fallback: None,
        }
    }

    #[must_use]
    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    #[must_use]
    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, capability: &'static str) -> Self {
        self.fallback = Some(capability);
        self
    }

    /// JSON-schema object for the parameters, as function-calling APIs expect.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                let mut property = json!({
                    "type": p.kind.json_type(),
                    "description": p.description,
                });
                if let Some(default) = &p.default {
                    property["default"] = default.clone();
                }
                (p.name.to_string(), property)
            })
            .collect();
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Apply defaults, check required arguments and coerce types.
    ///
    /// # Errors
    ///
    /// [`CapabilityFailure::InvalidArguments`] when a required argument is
    /// missing or a value cannot be converted to the declared type.
    pub fn resolve_args(&self, raw: &Map<String, Value>) -> Result<CapabilityArgs, CapabilityFailure> {
        let mut values = Map::new();
        for param in &self.params {
            let supplied = raw.get(param.name).filter(|v| !v.is_null());
            let value = match (supplied, &param.default) {
                (Some(v), _) => param.coerce(v).ok_or_else(|| {
                    CapabilityFailure::InvalidArguments(format!(
                        "'{}' must be a {}, got {v}",
                        param.name,
                        param.kind.json_type()
                    ))
                })?,
                (None, Some(default)) => default.clone(),
                (None, None) if param.required => {
                    return Err(CapabilityFailure::InvalidArguments(format!(
                        "missing required argument '{}'",
                        param.name
                    )))
                }
                (None, None) => continue,
            };
            values.insert(param.name.to_string(), value);
        }
        Ok(CapabilityArgs { values })
    }
}

/// Arguments after defaults and coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityArgs {
    values: Map<String, Value>,
}

impl CapabilityArgs {
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// # Errors
    ///
    /// [`CapabilityFailure::InvalidArguments`] when absent or blank.
    pub fn required_str(&self, name: &str) -> Result<&str, CapabilityFailure> {
        self.str(name)
            .ok_or_else(|| CapabilityFailure::InvalidArguments(format!("'{name}' must not be empty")))
    }

    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// Integer argument clamped into `min..=max`, or `default`.
    #[must_use]
    pub fn count(&self, name: &str, default: usize, min: usize, max: usize) -> usize {
        self.integer(name)
            .map_or(default, |n| usize::try_from(n.max(0)).unwrap_or(max))
            .clamp(min, max)
    }
}

/// An executable capability.
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// # Errors
    ///
    /// Any [`CapabilityFailure`]; the registry turns it into a failed result.
    fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure>;
}

/// A capability call proposed by the model (or synthesized by the orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CapabilityCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    #[must_use]
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CapabilityNotFound,
    ExecutionError,
    EntityNotFoundLocally,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityResult {
    pub call_id: String,
    pub name: String,
    pub ok: bool,
    pub text: String,
    pub error_kind: Option<ErrorKind>,
    /// Set for [`ErrorKind::EntityNotFoundLocally`].
    pub reference: Option<EntityReference>,
}

impl CapabilityResult {
    fn success(call: &CapabilityCall, text: String) -> Self {
        let text = if text.trim().is_empty() {
            no_results_text(&call.name)
        } else {
            text
        };
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            ok: true,
            text,
            error_kind: None,
            reference: None,
        }
    }

    fn failure(call: &CapabilityCall, kind: ErrorKind, text: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            ok: false,
            text,
            error_kind: Some(kind),
            reference: None,
        }
    }

    fn execution_error(call: &CapabilityCall, message: &str) -> Self {
        Self::failure(
            call,
            ErrorKind::ExecutionError,
            format!(
                "CapabilityError: {} failed: {message}. Sorry about that, the service may be \
                 temporarily unavailable. Let the user know and suggest trying again.",
                call.name
            ),
        )
    }
}

/// Sentinel used in place of blank capability output.
#[must_use]
pub fn no_results_text(name: &str) -> String {
    format!("The {name} tool completed but returned no results.")
}

pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    timeout: Duration,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            capabilities: HashMap::new(),
            timeout,
        }
    }

    /// Register a capability; a later registration under the same name wins.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.descriptor().name.to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            warn!("Capability '{name}' registered twice, keeping the latest");
        }
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(name).map(|c| c.descriptor())
    }

    /// Descriptors for the registered subset of `names`, in that order.
    #[must_use]
    pub fn descriptors_for(&self, names: &[&str]) -> Vec<&CapabilityDescriptor> {
        names.iter().filter_map(|n| self.descriptor(n)).collect()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `invoke(name, args)` with a generated call id.
    #[must_use]
    pub fn invoke(&self, name: &str, args: Map<String, Value>) -> CapabilityResult {
        self.execute(&CapabilityCall::new(format!("direct_{name}"), name, args))
    }

    /// Run one call to completion (or timeout). Never panics.
    #[must_use]
    pub fn execute(&self, call: &CapabilityCall) -> CapabilityResult {
        let Some(capability) = self.capabilities.get(&call.name) else {
            warn!("Model requested unknown capability '{}'", call.name);
            return CapabilityResult::failure(
                call,
                ErrorKind::CapabilityNotFound,
                format!(
                    "CapabilityNotFound: no capability named '{}'. Available capabilities: {}.",
                    call.name,
                    self.names().join(", ")
                ),
            );
        };

        let args = match capability.descriptor().resolve_args(&call.args) {
            Ok(args) => args,
            Err(e) => return CapabilityResult::execution_error(call, &e.to_string()),
        };

        info!("Executing capability {} ({})", call.name, call.id);
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(capability);
        let spawned = thread::Builder::new()
            .name(format!("capability-{}", call.name))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.invoke(&args)));
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return CapabilityResult::execution_error(call, &format!("could not start worker: {e}"));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(Ok(text))) => CapabilityResult::success(call, text),
            Ok(Ok(Err(CapabilityFailure::EntityNotFoundLocally(reference)))) => {
                info!("{} could not find '{reference}' locally", call.name);
                let mut result = CapabilityResult::failure(
                    call,
                    ErrorKind::EntityNotFoundLocally,
                    format!("{ENTITY_NOT_FOUND_MARKER}: '{reference}' was not found in the local catalog."),
                );
                result.reference = Some(reference);
                result
            }
            Ok(Ok(Err(failure))) => {
                warn!("Capability {} failed: {failure}", call.name);
                CapabilityResult::execution_error(call, &failure.to_string())
            }
            Ok(Err(_)) => {
                warn!("Capability {} panicked", call.name);
                CapabilityResult::execution_error(call, "internal error")
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Capability {} timed out after {:?}", call.name, self.timeout);
                CapabilityResult::execution_error(
                    call,
                    &format!("timed out after {} seconds", self.timeout.as_secs_f32()),
                )
            }
            Err(RecvTimeoutError::Disconnected) => {
                CapabilityResult::execution_error(call, "worker exited without a result")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(CapabilityDescriptor);

    impl Capability for Echo {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.0
        }

        fn invoke(&self, args: &CapabilityArgs) -> Result<String, CapabilityFailure> {
            match args.required_str("text")? {
                "panic" => panic!("boom"),
                "sleep" => {
                    thread::sleep(Duration::from_millis(500));
                    Ok("late".into())
                }
                "missing" => Err(CapabilityFailure::EntityNotFoundLocally(EntityReference::new(
                    "Hotel California",
                    Some("Eagles".into()),
                ))),
                "blank" => Ok("   ".into()),
                other => Ok(format!("{other} x{}", args.count("times", 1, 1, 5))),
            }
        }
    }

    fn registry(timeout: Duration) -> CapabilityRegistry {
        let descriptor = CapabilityDescriptor::new(
            "echo",
            "Echo text back",
            vec![
                ParamSpec::required("text", ParamKind::String, "Text to echo"),
                ParamSpec::optional("times", ParamKind::Integer, Some(json!(1)), "Repeat count"),
            ],
        );
        let mut registry = CapabilityRegistry::new(timeout);
        registry.register(Arc::new(Echo(descriptor)));
        registry
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_success_with_defaults_and_coercion() {
        let registry = registry(Duration::from_secs(2));

        let result = registry.invoke("echo", args(json!({"text": "hi"})));
        assert!(result.ok);
        assert_eq!(result.text, "hi x1");

        let coerced = registry.invoke("echo", args(json!({"text": "hi", "times": "3"})));
        assert_eq!(coerced.text, "hi x3");
    }

    #[test]
    fn test_unknown_capability_lists_available() {
        let registry = registry(Duration::from_secs(2));
        let result = registry.invoke("nope", Map::new());

        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::CapabilityNotFound));
        assert!(result.text.contains("echo"));
    }

    #[test]
    fn test_missing_required_argument_is_execution_error() {
        let registry = registry(Duration::from_secs(2));
        let result = registry.invoke("echo", Map::new());

        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
        assert!(result.text.starts_with("CapabilityError"));
    }

    #[test]
    fn test_blank_output_becomes_sentinel() {
        let registry = registry(Duration::from_secs(2));
        let result = registry.invoke("echo", args(json!({"text": "blank"})));

        assert!(result.ok);
        assert_eq!(result.text, "The echo tool completed but returned no results.");
    }

    #[test]
    fn test_panic_and_timeout_are_contained() {
        let registry = registry(Duration::from_millis(50));

        let panicked = registry.invoke("echo", args(json!({"text": "panic"})));
        assert_eq!(panicked.error_kind, Some(ErrorKind::ExecutionError));

        let slow = registry.invoke("echo", args(json!({"text": "sleep"})));
        assert_eq!(slow.error_kind, Some(ErrorKind::ExecutionError));
        assert!(slow.text.contains("timed out"));
    }

    #[test]
    fn test_entity_not_found_carries_reference() {
        let registry = registry(Duration::from_secs(2));
        let result = registry.invoke("echo", args(json!({"text": "missing"})));

        assert_eq!(result.error_kind, Some(ErrorKind::EntityNotFoundLocally));
        assert_eq!(result.reference.unwrap().search_query(), "Hotel California Eagles");
        assert!(result.text.starts_with(ENTITY_NOT_FOUND_MARKER));
    }

    #[test]
    fn test_json_schema_lists_required() {
        let registry = registry(Duration::from_secs(1));
        let schema = registry.descriptor("echo").unwrap().json_schema();

        assert_eq!(schema["properties"]["times"]["type"], "integer");
        assert_eq!(schema["required"], json!(["text"]));
    }
}
