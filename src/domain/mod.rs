//! Domain layer for rask-error-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `Report`: The pipeline's core data type
//! - `Severity`: Report severity (Debug/Info/Warning/Error/Fatal)
//! - `RequestSource` / `RequestInfo`: Framework-neutral HTTP request context
//! - `ReporterError`: Top-level error type

pub mod error;
pub mod report;
pub mod request;

pub use error::ReporterError;
pub use report::{Report, ReportBuilder, Severity, StackSummary};
pub use request::{RequestInfo, RequestSource};
