//! `procura-auth`: session model and the pure session state machine.
//!
//! This crate is intentionally decoupled from HTTP and storage: it decides
//! transitions, the client crate performs their effects.

pub mod business_unit;
pub mod error;
pub mod keys;
pub mod machine;
pub mod session;

pub use business_unit::{BuConfig, BusinessUnit, Department};
pub use error::SessionError;
pub use keys::SessionKey;
pub use machine::{LogoutCause, SessionCommand, SessionEvent, SessionMachine, SessionPhase, SessionView};
pub use session::{Credentials, Session, TokenPair, UserProfile};
