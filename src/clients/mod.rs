pub mod job_client;
pub mod job_types;
pub mod llm_client;

pub use job_client::JobClient;
pub use job_types::{JobHandle, JobInput, JobResult, JobStatus};
pub use llm_client::LlmClient;
