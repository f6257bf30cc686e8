use crate::agents::{Role, StepKind, StepUpdate};

/// Assistant text from model steps, keyed by the agent that produced it.
///
/// Tool steps are skipped, as are assistant turns that only carry tool calls.
pub fn extract_assistant_content(updates: &[StepUpdate]) -> Vec<(String, String)> {
    updates
        .iter()
        .filter(|update| update.kind == StepKind::Model)
        .flat_map(|update| {
            update
                .messages
                .iter()
                .filter(|message| message.role == Role::Assistant)
                .filter(|message| !message.content.trim().is_empty())
                .map(move |message| (update.agent.clone(), message.content.clone()))
        })
        .collect()
}
