use crate::model::ModelError;
use thiserror::Error;

/// Faults that abort a run and reach the caller. Tool-level faults never
/// appear here: they are folded into history as failure tool results so the
/// next reasoning step can self-correct.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Inference(#[from] ModelError),
    #[error("agent produced no usable final answer")]
    NoFinalAnswer,
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Inference(err) => err.user_message(),
            AgentError::NoFinalAnswer => {
                "The agent could not produce an answer for this question. Try rephrasing it."
                    .to_string()
            }
        }
    }
}
