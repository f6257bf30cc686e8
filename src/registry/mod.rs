pub mod prompts;
pub mod workers;

pub use prompts::{BuiltinPrompts, JsonPromptSource, PromptBundle, PromptResolver};
pub use workers::{WorkerId, WorkerRegistry};
