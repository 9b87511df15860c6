//! Feature state owned by the routers.

pub mod messages;
pub mod presence;
pub mod transcript;

pub use messages::RoomMessages;
pub use presence::{OnlineRoster, TypingEntry, TypingTracker, DEFAULT_TYPING_TTL};
pub use transcript::AgentTranscript;
