//! Credit Ledger
//!
//! Credits are the in-app currency (10 credits = 1 USD at top-up time). Only
//! the running balance lives on the user; processed payment intents are
//! recorded separately so each intent credits exactly once.
//!
//! ```text
//! ┌──────────────────────┐
//! │ payment confirmation │──┐
//! └──────────────────────┘  │   ┌──────────────┐    ┌───────────────────────┐
//!                           ├──►│ CreditLedger │───►│ processed_payments    │
//! ┌──────────────────────┐  │   │ (authorize,  │    │ (insert once) + users │
//! │ provider webhook     │──┘   │  validate)   │    │ (atomic increment)    │
//! └──────────────────────┘      └──────────────┘    └───────────────────────┘
//!                                      ▲
//!                           admin grant┘
//! ```

mod manager;
mod source;

pub use manager::{credits_for_cents, CreditLedger, CREDITS_PER_USD};
pub use source::CreditSource;
