pub mod logger;
pub mod reader;
pub mod types;

pub use logger::{AuditLogger, AuditSink};
pub use reader::AuditReader;
pub use types::*;
