//! # chatline-protocol
//!
//! Message types and codecs for the Chatline chat relay.
//!
//! Two encodings are defined here:
//!
//! - **Wire format** - JSON text frames exchanged with browser clients
//! - **Broker format** - MessagePack payloads carried on the broadcast channel
//!
//! ## Example
//!
//! ```rust
//! use chatline_protocol::{codec, ChatMessage};
//!
//! let inbound = br#"{"user_id":"u1","timestamp":1700000000,"message":"hi"}"#;
//! let message = codec::decode(inbound).unwrap();
//!
//! let on_broker = codec::encode_broker(&message).unwrap();
//! let relayed = codec::decode_broker(&on_broker).unwrap();
//!
//! let outbound = codec::encode(&relayed).unwrap();
//! assert_eq!(&outbound[..], br#"{"from":"u1","date":1700000000,"message":"hi"}"#);
//! ```

pub mod codec;
pub mod frames;
pub mod message;

pub use codec::{ChatCodec, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
pub use frames::ServerFrame;
pub use message::{ChatMessage, ClientMessage};
