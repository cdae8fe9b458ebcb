pub mod calls;
mod health;
pub mod sse;
pub mod webhooks;

pub use health::*;
