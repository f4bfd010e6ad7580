pub mod antibot;
pub mod captcha;
pub mod cnr;
pub mod core;
pub mod portal;
pub mod sink;
pub mod tools;

// --- Primary core exports ---
pub use crate::core::error::HarvestError;
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

pub use crate::captcha::CaptchaSolver;
pub use crate::cnr::{CnrNumber, CnrRange};
pub use crate::portal::CasePortal;
pub use crate::sink::CaseSink;
pub use crate::tools::{batch, lookup};
