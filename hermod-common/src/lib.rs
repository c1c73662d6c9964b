pub mod address;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod logging;
pub mod policy;
pub mod status;
pub mod traits;
pub mod users;

pub use tracing;

pub use address::Address;
pub use envelope::Envelope;
pub use policy::{Policy, PolicyConfig};
pub use users::{User, UserDirectory};

/// Username of the bounce sentinel sender (`MAILER_DAEMON@<primary domain>`).
pub const MAILER_DAEMON: &str = "MAILER_DAEMON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
