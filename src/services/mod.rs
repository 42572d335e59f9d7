pub mod cost_service;
pub mod diagnostic_writer;
pub mod matching_service;
pub mod resume_service;
pub mod usage_service;

pub use cost_service::CostService;
pub use diagnostic_writer::DiagnosticWriter;
pub use matching_service::{match_results, MatchStrategy, Matched};
pub use resume_service::{DownstreamAction, PendingSplit, ResumeService};
pub use usage_service::UsageService;
