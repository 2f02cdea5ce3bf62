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
//

//! The session façade: version exchange, key exchange and service
//! dispatch, driven one message at a time by the host program.

use std::num::Wrapping;

use log::{debug, warn};

use crate::auth::AuthState;
use crate::cipher::{self, Cipher, OpeningKey, SealingKey, _CLEAR};
use crate::key::KeyPair;
use crate::mac::_NONE;
use crate::messages::Message;
use crate::negotiation::{self, Names, Preferred};
use crate::sshbuffer::{SSHBuffer, SshId};
use crate::{kex, msg, Disconnect, Error, User};

const VERSION_STRING: &str = "awa_ssh_0.1";

/// Everything the exchange hash binds: both identification strings, both
/// KEXINIT payloads and both ephemeral Diffie-Hellman values.
#[derive(Debug, Default, Clone)]
pub(crate) struct Exchange {
    pub client_id: Vec<u8>,
    pub server_id: Vec<u8>,
    pub client_kex_init: Vec<u8>,
    pub server_kex_init: Vec<u8>,
    pub client_ephemeral: Vec<u8>,
    pub server_ephemeral: Vec<u8>,
}

impl Exchange {
    pub fn new() -> Self {
        Exchange::default()
    }
}

/// The server side of one SSH connection, as a pure state machine. Feed
/// it inbound bytes, poll it for parsed messages, handle them, and write
/// whatever `encode` returns to the peer.
pub struct Session {
    client_banner: Option<String>,
    pub(crate) exchange: Exchange,
    preferred: Preferred,
    names: Option<Names>,
    host_key: KeyPair,
    pub(crate) session_id: Option<Vec<u8>>,

    opening: Box<dyn OpeningKey + Send>,
    sealing: Box<dyn SealingKey + Send>,
    opening_cipher: cipher::Name,
    sealing_cipher: cipher::Name,
    pending_opening: Option<(Box<dyn OpeningKey + Send>, cipher::Name)>,
    pending_sealing: Option<(Box<dyn SealingKey + Send>, cipher::Name)>,

    read: SSHBuffer,
    write: SSHBuffer,

    pub(crate) expected: Option<u8>,
    ignore_next_packet: bool,

    pub(crate) auth: AuthState,
    pub(crate) users: Vec<User>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_banner", &self.client_banner)
            .field("opening_cipher", &self.opening_cipher)
            .field("sealing_cipher", &self.sealing_cipher)
            .field("expected", &self.expected)
            .field("auth", &self.auth)
            .finish()
    }
}

impl Session {
    /// Create a session around a host key and a user database. The
    /// returned messages are our identification string followed by our
    /// KEXINIT; encode and send them before reading from the peer.
    pub fn new(host_key: KeyPair, users: Vec<User>) -> (Session, Vec<Message>) {
        Session::new_with_preferred(host_key, users, Preferred::DEFAULT)
    }

    pub fn new_with_preferred(
        host_key: KeyPair,
        users: Vec<User>,
        preferred: Preferred,
    ) -> (Session, Vec<Message>) {
        let server_id = SshId::Standard(format!("SSH-2.0-{VERSION_STRING}"));

        let mut server_kex_init = Vec::new();
        negotiation::write_kex(&preferred, &mut server_kex_init);

        let mut exchange = Exchange::new();
        exchange.server_id = server_id.as_kex_hash_bytes().to_vec();
        exchange.server_kex_init = server_kex_init.clone();

        let session = Session {
            client_banner: None,
            exchange,
            preferred,
            names: None,
            host_key,
            session_id: None,
            opening: _CLEAR.make_opening_key(&[], &[], &[], &_NONE),
            sealing: _CLEAR.make_sealing_key(&[], &[], &[], &_NONE),
            opening_cipher: cipher::CLEAR,
            sealing_cipher: cipher::CLEAR,
            pending_opening: None,
            pending_sealing: None,
            read: SSHBuffer::new(),
            write: SSHBuffer::new(),
            expected: Some(msg::VERSION),
            ignore_next_packet: false,
            auth: AuthState::Preauth,
            users,
        };

        let greeting = vec![
            Message::Version(VERSION_STRING.to_string()),
            Message::KexInit(server_kex_init),
        ];
        (session, greeting)
    }

    /// Append raw inbound bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.read.buffer.extend_from_slice(bytes);
    }

    /// The peer's software identification, once its banner line arrived.
    pub fn peer_banner(&self) -> Option<&str> {
        self.client_banner.as_deref()
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    /// The first exchange hash; write-once.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Parse one inbound message out of the buffer, `Ok(None)` when more
    /// bytes are needed.
    pub fn poll(&mut self) -> Result<Option<Message>, Error> {
        if self.client_banner.is_none() {
            return self.poll_banner();
        }
        loop {
            let Some(payload) = cipher::read(&mut self.read, &mut *self.opening)? else {
                return Ok(None);
            };
            if self.ignore_next_packet {
                // A wrong first-kex-packet guess from the peer.
                debug!("dropping guessed kex packet");
                self.ignore_next_packet = false;
                continue;
            }
            return Ok(Some(Message::parse(&payload)?));
        }
    }

    /// Scan for the peer's identification line, skipping preface lines.
    fn poll_banner(&mut self) -> Result<Option<Message>, Error> {
        loop {
            let Some(eol) = self
                .read
                .buffer
                .windows(2)
                .position(|w| w == b"\r\n")
            else {
                // https://tools.ietf.org/html/rfc4253#section-4.2
                if self.read.buffer.len() > 8192 {
                    return Err(Error::Version);
                }
                return Ok(None);
            };
            let line: Vec<u8> = self.read.buffer.drain(..eol + 2).take(eol).collect();
            if line.starts_with(b"SSH-") {
                return Ok(Some(Message::Version(parse_banner_line(&line)?)));
            }
            // A preface line, sent before the version string.
        }
    }

    /// Process one parsed message, returning the messages to send back.
    pub fn handle(&mut self, msg: Message) -> Result<Vec<Message>, Error> {
        self.check_expected(&msg)?;

        match msg {
            Message::Version(v) => {
                self.client_banner = Some(v.clone());
                self.exchange.client_id = format!("SSH-2.0-{v}").into_bytes();
                self.expected = Some(msg::KEXINIT);
                Ok(vec![])
            }

            Message::KexInit(raw) => {
                if raw.first() != Some(&msg::KEXINIT) {
                    return Err(Error::Malformed);
                }
                let names = negotiation::read_kex(&raw, &self.preferred)?;
                self.exchange.client_kex_init = raw;
                self.ignore_next_packet = names.ignore_guessed;
                self.names = Some(names);
                self.expected = Some(msg::KEXDH_INIT);
                Ok(vec![])
            }

            Message::KexDhInit { e } => self.server_dh(&e),

            Message::NewKeys => {
                let (key, name) = self.pending_opening.take().ok_or(Error::Inconsistent)?;
                let first_kex = self.opening_cipher == cipher::CLEAR;
                self.opening = key;
                self.opening_cipher = name;
                self.expected = if first_kex {
                    Some(msg::SERVICE_REQUEST)
                } else {
                    None
                };
                Ok(vec![])
            }

            Message::ServiceRequest(service) => {
                if service == "ssh-userauth" {
                    self.expected = Some(msg::USERAUTH_REQUEST);
                    Ok(vec![Message::ServiceAccept(service)])
                } else {
                    warn!("unknown service {service:?} requested");
                    Ok(vec![Message::Disconnect {
                        reason: Disconnect::ServiceNotAvailable,
                        description: format!("no service {service}"),
                        language: String::new(),
                    }])
                }
            }

            Message::UserauthRequest {
                user,
                service,
                method,
            } => self.server_read_auth_request(user, service, method),

            Message::Disconnect { .. } => Ok(vec![]),
            Message::Ignore(_) => Ok(vec![]),
            Message::Debug { .. } => Ok(vec![]),

            other => Err(Error::Unhandled(other.id())),
        }
    }

    /// Serialize for the wire under the current outbound keys. Emitting
    /// NEWKEYS installs the pending outbound key set: every later packet
    /// is sealed under the new keys.
    pub fn encode(&mut self, msg: &Message) -> Result<Vec<u8>, Error> {
        if let Message::Version(v) = msg {
            let mut out = Vec::new();
            SshId::Standard(format!("SSH-2.0-{v}")).write(&mut out);
            return Ok(out);
        }

        let mut payload = Vec::new();
        msg.serialize(&mut payload)?;
        self.sealing.write(&payload, &mut self.write);
        let out = std::mem::take(&mut self.write.buffer);

        if let Message::NewKeys = msg {
            if let Some((key, name)) = self.pending_sealing.take() {
                self.sealing = key;
                self.sealing_cipher = name;
            }
        }
        Ok(out)
    }

    /// `encode` every message in order, with error short-circuit.
    pub fn encode_many(&mut self, msgs: &[Message]) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        for msg in msgs {
            out.extend(self.encode(msg)?);
        }
        Ok(out)
    }

    fn check_expected(&self, msg: &Message) -> Result<(), Error> {
        let id = msg.id();
        // https://tools.ietf.org/html/rfc4253#section-11
        if let msg::DISCONNECT | msg::IGNORE | msg::DEBUG = id {
            return Ok(());
        }
        match self.expected {
            Some(expected) if expected != id => Err(Error::Unexpected(id)),
            _ => Ok(()),
        }
    }

    fn server_dh(&mut self, e: &[u8]) -> Result<Vec<Message>, Error> {
        let names = self.names.clone().ok_or(Error::Inconsistent)?;
        if self.exchange.client_id.is_empty() || self.exchange.client_kex_init.is_empty() {
            return Err(Error::Inconsistent);
        }
        if self.pending_opening.is_some() || self.pending_sealing.is_some() {
            return Err(Error::Inconsistent);
        }

        let mut kex = kex::KexAlgorithm::make(names.kex)?;
        kex.server_dh(&mut self.exchange, e)?;

        let host_key_blob = self.host_key.public_key().to_blob();
        let hash = kex.compute_exchange_hash(&host_key_blob, &self.exchange)?;

        // The first exchange hash is the session id.
        let session_id = self.session_id.get_or_insert_with(|| hash.clone());

        let pair = kex.compute_keys(
            session_id,
            &hash,
            names.client_cipher,
            names.server_cipher,
            names.client_mac,
            names.server_mac,
            true,
        )?;
        self.pending_opening = Some((pair.remote_to_local, names.client_cipher));
        self.pending_sealing = Some((pair.local_to_remote, names.server_cipher));

        debug!("signing exchange hash with the host key");
        let signature = self.host_key.sign_detached(&hash)?;

        self.expected = Some(msg::NEWKEYS);
        Ok(vec![
            Message::KexDhReply {
                host_key: host_key_blob,
                f: self.exchange.server_ephemeral.clone(),
                signature,
            },
            Message::NewKeys,
        ])
    }
}

fn parse_banner_line(line: &[u8]) -> Result<String, Error> {
    let rest = line.strip_prefix(b"SSH-2.0-").ok_or(Error::Version)?;
    let rest = std::str::from_utf8(rest).map_err(|_| Error::Version)?;
    let software = rest.split(' ').next().unwrap_or_default();
    if software.is_empty()
        || !software
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(Error::Version);
    }
    Ok(rest.to_string())
}
