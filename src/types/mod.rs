//! Core types: decoded events, tool invocations, outcomes, session shapes.

pub mod event;
pub mod outcome;
pub mod session;
pub mod tool;

pub use event::*;
pub use outcome::*;
pub use session::*;
pub use tool::*;
