//! The two shipped queue kinds: notification delivery and AI-workflow
//! commands. Both instantiate the same engine.

pub mod command;
pub mod delivery;

pub use command::CommandKind;
pub use delivery::DeliveryKind;
