pub mod agent;
pub mod specialists;
pub mod traits;

pub use agent::Agent;
pub use specialists::{AgentFactory, SharedWorkerAgent};
pub use traits::{
    last_text, AgentBehavior, AgentRequest, AgentResponse, Message, Role, StepKind, StepSender,
    StepUpdate, ToolCall,
};
