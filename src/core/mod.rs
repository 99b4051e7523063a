pub mod dialogflow;
pub mod providers;

// Re-export commonly used types for convenience
pub use dialogflow::{
    CallLogger, DialogflowClient, DialogflowError, FlatResult, LogField, LogValue,
    NoopCallLogger, RpcStatus, Session, SessionState, SynthesisRequest, TracingCallLogger,
    UserData,
};
