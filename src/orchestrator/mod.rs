pub mod context;
pub mod delegation;
pub mod handoff;
pub mod supervisor;
pub mod transcript;

pub use context::RegistryContext;
pub use handoff::{create_react_supervisor, HandoffOptions, OutputMode};
pub use supervisor::create_supervisor;
pub use transcript::extract_assistant_content;
