pub mod chat;
pub mod events;
pub mod insights;
pub mod prompts;
pub mod results;
pub mod runs;
pub mod upload;
