#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
#![allow(clippy::single_match, clippy::upper_case_acronyms)]
// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server side of the SSH transport and user-authentication layers as a
//! pure state machine.
//!
//! This crate performs no I/O. A host program owns the socket, feeds
//! inbound bytes into a [`Session`] and writes whatever the session asks
//! it to emit:
//!
//! ```no_run
//! use awa_ssh::{KeyPair, Session, User};
//!
//! let host_key = KeyPair::generate_rsa(2048).unwrap();
//! let users = vec![User {
//!     name: "alice".into(),
//!     password: Some("wonderland".into()),
//!     keys: vec![],
//! }];
//! let (mut session, greeting) = Session::new(host_key, users);
//! let mut out = session.encode_many(&greeting).unwrap();
//! // write `out` to the socket, then for every chunk read from it:
//! # let chunk: &[u8] = &[];
//! session.feed(chunk);
//! while let Some(msg) = session.poll().unwrap() {
//!     let replies = session.handle(msg).unwrap();
//!     out = session.encode_many(&replies).unwrap();
//!     // write `out` to the socket
//! }
//! ```
//!
//! The session drives version exchange, key exchange (Diffie-Hellman
//! group 14), key derivation and installation at the NEWKEYS barrier,
//! packet encryption and MAC handling, and the `ssh-userauth` service
//! with public-key and password authentication. Everything above
//! userauth (channels, shells) belongs to the host.
//!
//! # Design principles
//!
//! The core exposes pure transitions so the host can drive it from any
//! I/O model (threads, event loop, fibers) without this library taking a
//! dependency. Two sessions share nothing; dropping a session scrubs its
//! key material.

use thiserror::Error;

mod auth;
pub mod cipher;
mod encoding;
pub mod kex;
pub mod key;
pub mod mac;
mod messages;
mod msg;
mod negotiation;
mod session;
mod sshbuffer;

#[cfg(test)]
mod tests;

pub use auth::{AuthState, User};
pub use key::{KeyPair, PublicKey};
pub use messages::{AuthMethod, Message};
pub use negotiation::{Names, Preferred};
pub use session::Session;
pub use sshbuffer::SshId;

#[derive(Debug)]
pub enum AlgorithmKind {
    Kex,
    Key,
    Cipher,
    Compression,
    Mac,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid SSH version string.
    #[error("invalid SSH version string")]
    Version,

    /// Wire decoding failed.
    #[error("could not parse the packet")]
    Malformed,

    /// A well-formed message arrived out of order.
    #[error("unexpected message id {0}")]
    Unexpected(u8),

    /// Invalid packet authentication code.
    #[error("wrong packet authentication code")]
    PacketAuth,

    /// No common algorithm found during key exchange.
    #[error("no common {kind:?} algorithm - ours: {ours:?}, theirs: {theirs:?}")]
    NoCommonAlgo {
        kind: AlgorithmKind,
        ours: Vec<String>,
        theirs: Vec<String>,
    },

    /// Unknown algorithm name.
    #[error("unknown algorithm")]
    UnknownAlgo,

    /// Error during key exchange.
    #[error("key exchange failed")]
    Kex,

    /// The protocol is in an inconsistent state.
    #[error("inconsistent state of the protocol")]
    Inconsistent,

    /// Excessive packet size.
    #[error("bad packet size: {0}")]
    PacketSize(usize),

    /// The peer kept failing authentication.
    #[error("too many authentication failures")]
    AuthExhausted,

    /// A message this library does not implement.
    #[error("message id {0} is not handled")]
    Unhandled(u8),

    #[error(transparent)]
    Rsa(#[from] rsa::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

/// A reason for disconnection.
#[allow(missing_docs)] // This should be relatively self-explanatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    HostNotAllowedToConnect = 1,
    ProtocolError = 2,
    KeyExchangeFailed = 3,
    Reserved = 4,
    MACError = 5,
    CompressionError = 6,
    ServiceNotAvailable = 7,
    ProtocolVersionNotSupported = 8,
    HostKeyNotVerifiable = 9,
    ConnectionLost = 10,
    ByApplication = 11,
    TooManyConnections = 12,
    AuthCancelledByUser = 13,
    NoMoreAuthMethodsAvailable = 14,
    IllegalUserName = 15,
}

impl TryFrom<u32> for Disconnect {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MACError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            _ => return Err(crate::Error::Malformed),
        })
    }
}
