//! Message Dispatch
//!
//! Type-keyed publish/subscribe plus outbound gating.
//!
//! ## Architecture
//!
//! - **Dispatcher**: validates inbound messages and fans them out to listeners
//! - **ListenerRegistry**: ordered listener handles with explicit unregistration
//! - **RateLimiter**: sliding-window admission for `question` traffic
//! - **SignatureSet**: periodic-clear memory of recently sent questions
//!
//! Listeners for a kind run first, then wildcard listeners, each group in
//! registration order. A message that fails validation never reaches them;
//! error listeners receive a synthesized `error` message instead.

mod dedup;
mod dispatcher;
mod rate_limiter;
mod registry;

pub use dedup::{Signature, SignatureSet, NEW_CONVERSATION};
pub use dispatcher::{
    Dispatcher, DispatcherSettings, MessageListener, MessageSink, RateLimitListener, SendOutcome,
    Topic,
};
pub use rate_limiter::RateLimiter;
pub use registry::{ListenerId, ListenerRegistry};

pub(crate) use registry::invoke_guarded;
