//! nomir shared protocol types
//!
//! This crate holds everything two nomir peers must agree on: the value
//! model, the byte codec, datagram framing, operation codes, error
//! classification, and the authentication seam. The runtime lives in
//! `nomir-service`; this crate does no I/O.
//!
//! # Overview
//!
//! nomir (Network Object Mirroring) makes remote objects behave like local
//! ones. Peers exchange single-datagram messages; each message is a framed
//! header plus one encoded [`Value`]. Values that have no wire form (live
//! objects) travel as references into the sender's export table and come
//! back to life as proxies on the other side.
//!
//! # Components
//!
//! - [`value`] - the [`Value`] tagged union and its shared containers
//! - [`codec`] - self-delimiting encode/decode with the reference fallback
//! - [`frame`] - `[magic | version | flags | tid | opcode | payload]` framing
//! - [`opcode`] - the one-byte operation set
//! - [`object`] - the [`MirrorObject`] capability trait
//! - [`auth`] - [`Authenticator`] admission and permission hooks
//! - [`error`] - [`NomirError`] and the wire-level [`ErrorKind`] tags
//!
//! # Example
//!
//! ```
//! use nomir_common::codec::{decode, encode, NoReferences};
//! use nomir_common::value::{dict, Value};
//!
//! let value = dict([("answer", Value::Int(42))]);
//! let bytes = encode(&value, &NoReferences).unwrap();
//! let back = decode(&bytes, &NoReferences).unwrap();
//! assert_eq!(back, value);
//! ```

pub mod auth;
pub mod codec;
pub mod error;
pub mod frame;
pub mod object;
pub mod opcode;
pub mod value;

pub use auth::{Authenticator, DefaultAuthenticator, Target};
pub use codec::{ReferenceCodec, RefOrigin, WireRef};
pub use error::{ErrorKind, NomirError, Result};
pub use frame::{Header, FLAG_REPLY, HEADER_SIZE, MAX_DATAGRAM, MAX_PAYLOAD, WIRE_MAGIC, WIRE_VERSION};
pub use object::{Handle, MirrorObject};
pub use opcode::Opcode;
pub use value::{Dict, List, Value};
