//! Path establishment to the peers serving a group.
//!
//! - **[`broker`]**: [`StreamBroker`] opens a tagged stream to one candidate
//!   (direct for neighbors, relay-chained otherwise) and walks a candidate
//!   list until the first success.
//! - **[`control`]**: [`ControlExchange`] runs one request/response over a
//!   fresh `control` stream per candidate.

pub mod broker;
pub mod control;

pub use broker::StreamBroker;
pub use control::ControlExchange;
