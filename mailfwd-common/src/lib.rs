pub mod address;
pub mod domain;
pub mod logging;

pub use address::{AddressError, EmailAddress};
pub use domain::Domain;
pub use tracing;

/// Broadcast to every long-running task when the process is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
