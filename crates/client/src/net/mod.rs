pub mod lobby;
pub mod pipeline;
pub mod receiver;
pub mod welcome;

pub use lobby::LobbyClient;
pub use pipeline::{ClientFlags, MessagePipeline};
pub use receiver::Receiver;
pub use welcome::WelcomeLoop;
