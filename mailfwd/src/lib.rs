pub mod controller;
pub mod inbox;

pub use controller::{Disposition, Mailfwd, Runtime};
