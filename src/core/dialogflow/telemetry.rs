//! Call-event telemetry.
//!
//! Sessions report lifecycle events (create, start, transcription, results,
//! errors...) to a [`CallLogger`] supplied when the client is built. The
//! logger is a pure side channel: nothing it does changes session behavior.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Opaque host context attached to a session and handed back to the logger.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Value of one event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    Text(String),
    List(Vec<String>),
}

/// A named field of a call event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogField {
    pub name: String,
    pub value: LogValue,
}

impl LogField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: LogValue::Text(value.into()),
        }
    }

    pub fn list(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: LogValue::List(values),
        }
    }
}

impl fmt::Display for LogField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            LogValue::Text(value) => write!(f, "{}={}", self.name, value),
            LogValue::List(values) => write!(f, "{}=[{}]", self.name, values.join(",")),
        }
    }
}

/// Sink for structured call events.
pub trait CallLogger: Send + Sync {
    fn log_call(&self, user_data: Option<&UserData>, event: &str, fields: &[LogField]);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallLogger;

impl CallLogger for NoopCallLogger {
    fn log_call(&self, _user_data: Option<&UserData>, _event: &str, _fields: &[LogField]) {}
}

/// Forwards events to `tracing` on the `dfegrpc::call` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallLogger;

impl CallLogger for TracingCallLogger {
    fn log_call(&self, _user_data: Option<&UserData>, event: &str, fields: &[LogField]) {
        info!(target: "dfegrpc::call", event, fields = %render_fields(fields), "call event");
    }
}

/// Renders fields as `name=value` pairs separated by spaces.
pub fn render_fields(fields: &[LogField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
