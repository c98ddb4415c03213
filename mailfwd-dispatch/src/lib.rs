//! Dispatch path for forwarded mail
//!
//! This crate turns an inbound "raw email stored" notification into delivery
//! instructions:
//! - Compile authored per-domain rules into an immutable lookup table
//! - Validate notification envelopes
//! - Resolve the recipient to its forwarding destinations
//! - Hand the result to a [`DeliveryInvoker`]

mod compiler;
mod dispatcher;
pub mod envelope;
mod error;
mod invoker;
pub mod resolver;
mod rules;
mod spam;
mod types;
pub mod validator;

pub use compiler::{CompiledDomainConfig, CompiledTable, compile};
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher};
pub use error::{
    ConfigError, DeliveryError, DispatchError, PermanentError, ResolutionError, SystemError,
    TemporaryError, ValidationError,
};
pub use invoker::{DeliveryInvoker, LogInvoker};
pub use resolver::{ResolvedDelivery, Route, resolve};
pub use rules::{AliasRule, DomainRule, DomainRules};
pub use spam::SpamPolicy;
pub use types::{InboundEmailEvent, StorageLocation};
pub use validator::{DEFAULT_EXPECTED_SOURCE, Validator};
