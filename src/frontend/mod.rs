//! Front-end abstraction: the editor side of the orchestrator.
//!
//! The [`Frontend`] trait is every outbound call the core makes toward the
//! editor. Notifications are fire-and-forget; only [`Frontend::ask_yes_no`]
//! waits for an answer.

pub mod stdio;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::Result;

/// Role used for orchestrator-generated warning chunks.
pub const ROLE_WARNING: &str = "warning";

/// Role used for orchestrator-generated error chunks.
pub const ROLE_ERROR: &str = "error";

/// Role used for orchestrator-generated informational chunks.
pub const ROLE_INFO: &str = "info";

/// One outbound notification, in the shape the stdio transport writes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Notification {
    /// A chunk of output to append to the session's display buffer.
    FlushChunk {
        /// Target session.
        session: String,
        /// Chunk text.
        content: String,
        /// Role tag controlling presentation.
        role: String,
    },
    /// The session's interaction ended.
    AgentFinished {
        /// Target session.
        session: String,
    },
    /// The session's display buffer should be emptied.
    ClearBuffer {
        /// Target session.
        session: String,
    },
    /// Short status message for the user.
    UserMessage {
        /// Message text.
        message: String,
    },
}

/// Interface between the orchestrator core and the editor.
///
/// Implementations must be cheap to call from any task; notification
/// methods never block on the editor.
pub trait Frontend: Send + Sync {
    /// Append `content` to the session's output.
    fn flush_chunk(&self, session: &str, content: &str, role: &str);

    /// Signal that the session's interaction is over.
    fn agent_finished(&self, session: &str);

    /// Empty the session's display buffer.
    fn clear_buffer(&self, session: &str);

    /// Show a status message.
    fn user_message(&self, message: &str);

    /// Ask the user a yes/no question and wait for the answer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Frontend` if the question cannot be delivered or
    /// the transport closes before an answer arrives.
    fn ask_yes_no<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}
