//! Dialogue orchestration for the CRM assistant.
//!
//! A turn flows through a constrained loop:
//! 1. **Prompt** (`prompt`) - system instructions anchored to today's date
//! 2. **Model** (`llm`, `openai`) - one assistant turn per call, text and/or tool calls
//! 3. **Tools** (`tools`) - validated CRM operations, executed in order
//! 4. **Session** (`session`) - per-conversation history with idle expiry
//!
//! The model only translates language into tool arguments. Validation and the
//! CRM call itself are deterministic.

pub mod clock;
pub mod llm;
pub mod openai;
pub mod prompt;
pub mod runtime;
pub mod session;
pub mod tools;

pub use clock::{Clock, FixedClock, SystemClock};
pub use llm::{AssistantTurn, ChatMessage, LlmClient, LlmError, ToolCall, ToolSchema};
pub use openai::OpenAiCompatibleClient;
pub use runtime::{AgentError, AgentRuntime, TurnOutcome};
pub use session::{SessionError, SessionId, SessionStore};
pub use tools::{Tool, ToolInvocation, ToolRegistry};
