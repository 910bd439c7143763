//! Lease protocols for handing source rows to exactly one worker identity.
//!
//! Broker rows are claimed individually; the high-volume FUV table is claimed
//! as a contiguous id range tracked by one cursor per owner.

mod broker;
mod range;

pub use broker::{BrokerCheckout, CheckoutError, FINALIZE_BATCH_SIZE};
pub use range::{RangeCheckout, RangeError};
