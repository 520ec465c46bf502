//! Incident engine: known-error classification and the ticket writer

pub mod matcher;
pub mod writer;

pub use matcher::KnownErrorMatcher;
pub use writer::IncidentWriter;
