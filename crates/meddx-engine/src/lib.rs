//! Provider gateway and single-session orchestration for medical image
//! reports.

pub mod config;
pub mod error;
pub mod gateway;
pub mod session;

pub use config::GatewayConfig;
pub use error::{InferenceError, Precondition, SessionError, SessionResult};
pub use gateway::{DryrunGateway, InferenceGateway, OpenAiGateway};
pub use session::{Session, SessionCounters, SessionPhase, StagedImage};
