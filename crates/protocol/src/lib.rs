//! BTC/XMR swap protocol.
//!
//! The maker (Alice) sells XMR and the taker (Bob) sells BTC. After a key
//! and signature exchange each side runs its own state machine over the
//! Bitcoin and Monero chains, journaling every state it enters so a crashed
//! swap resumes from its last record.

pub mod alice;
pub mod bob;
mod chain;
pub mod contract;
pub mod error;
pub mod messages;
pub mod oracle;
pub mod phase;
pub mod retry;
pub mod store;
pub mod swap;
pub mod transport;
pub mod types;

pub use alice::{AliceContext, AliceSetup, AliceState};
pub use bob::{BobContext, BobSetup, BobState};
pub use error::SwapError;
pub use messages::Message;
pub use oracle::{FixedRateOracle, PriceOracle, Quote, QuotePolicy};
pub use phase::{Phase, Role};
pub use retry::RetryConfig;
pub use store::{FileStore, MemoryStore, StoreError, SwapStore, Transition};
pub use swap::Swap;
pub use transport::{
    channel_pair, channel_transport, ChannelTransport, Envelope, NewSwap, Router, SwapChannel,
    Transport,
};
pub use types::{Rate, SwapConfig, SwapId, SwapParameters};
