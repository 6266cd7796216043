pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod poller;
pub mod router;
pub mod runtime;
pub mod types;

pub use error::EngineError;
pub use gateway::{CallbackAck, CallbackGateway, TaskCallback};
pub use orchestrator::{Orchestrator, StatusReport, TaskResult, TaskSummary};
pub use poller::PollScheduler;
pub use router::{Route, RouteTable, WorkflowDefinition};
pub use runtime::{GraphRuntime, ResumeOutcome, RuntimeLimits};
