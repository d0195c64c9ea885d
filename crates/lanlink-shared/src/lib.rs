//! # lanlink-shared
//!
//! Pure domain leaves shared by the lanlink server and store:
//! typed identifiers, subnet-based network grouping, and the
//! conversation-key derivation / message-body encryption used for
//! messages at rest.

pub mod constants;
pub mod crypto;
pub mod network;
pub mod types;

mod error;

pub use error::CryptoError;
pub use types::{DeviceType, GroupKey, MessageType, UserId};
