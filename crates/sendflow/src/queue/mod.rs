pub mod engine;
pub mod error;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod report;
pub mod retry;
pub mod state;
pub mod template;

pub use engine::{EngineConfig, QueueEdit, SendEngine, TickOptions};
pub use error::{EntityKind, QueueError};
pub use limits::DailyBudget;
pub use maintenance::StaleSweep;
pub use model::{
    Company, CompanyRollup, Draft, DraftStatus, MailLog, NewQueueItem, QueueItem, QueueStatus,
    SendSettings, SendStatus, Template,
};
pub use report::{BatchReport, ItemResult, SkipReason, TickOutcome};
pub use retry::AutoRetry;
pub use state::{ClaimKind, QueueEvent, Transition};
pub use template::{SenderIdentity, TemplateVars};
