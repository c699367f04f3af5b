//! Action engine: platform tables, discovery, duplicate checks, comment
//! generation and the orchestrated action loop behind [`Engine::execute`].

pub mod actor;
pub mod auth;
pub mod dedup;
pub mod discovery;
pub mod engine;
pub mod generator;
pub mod orchestrator;
pub mod platform;

pub use actor::{BrowserActor, ItemActor, ItemSnapshot, Verification};
pub use auth::Authenticator;
pub use dedup::{fingerprint, DuplicateActionCache, HistoryVerifier};
pub use discovery::{CandidateSource, Discovery, RunContext};
pub use engine::Engine;
pub use generator::{CommentGenerator, FixedComment, OpenAiCommentGenerator};
pub use orchestrator::{Orchestrator, RunPlan, RunReport, Termination};
