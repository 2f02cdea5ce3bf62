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

//! The `ssh-userauth` sub-protocol: public-key probes and signatures,
//! passwords, failure counting.

use log::debug;
use subtle::ConstantTimeEq;

use crate::encoding::Encoding;
use crate::key::PublicKey;
use crate::messages::{AuthMethod, Message};
use crate::session::Session;
use crate::{msg, Disconnect, Error};

/// How many failed attempts one session tolerates before the caller is
/// told to hang up.
const MAX_FAILURES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No USERAUTH_REQUEST seen yet.
    Preauth,
    /// Attempts are running; the username and service are pinned by the
    /// first one.
    InProgress {
        user: String,
        service: String,
        failed: u32,
    },
    /// Authenticated. Further userauth messages are ignored.
    Done,
}

/// One entry of the user database. Identity is by name; the database is
/// immutable for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password: Option<String>,
    pub keys: Vec<PublicKey>,
}

fn lookup<'a>(users: &'a [User], name: &str) -> Option<&'a User> {
    users.iter().find(|u| u.name == name)
}

impl Session {
    pub(crate) fn server_read_auth_request(
        &mut self,
        user: String,
        service: String,
        method: AuthMethod,
    ) -> Result<Vec<Message>, Error> {
        // https://tools.ietf.org/html/rfc4252#section-5
        if self.session_id.is_none() {
            return Err(Error::Inconsistent);
        }
        // Once authenticated the userauth layer is inert: requests are
        // swallowed whatever they carry, the service field included.
        if let AuthState::Done = self.auth {
            return Ok(vec![]);
        }
        if service != "ssh-connection" {
            debug!("userauth for unknown service {service:?}");
            return Ok(vec![Message::Disconnect {
                reason: Disconnect::ServiceNotAvailable,
                description: format!("no service {service}"),
                language: String::new(),
            }]);
        }

        let failed = match &self.auth {
            AuthState::Done => return Ok(vec![]),
            AuthState::Preauth => {
                self.auth = AuthState::InProgress {
                    user: user.clone(),
                    service: service.clone(),
                    failed: 0,
                };
                0
            }
            AuthState::InProgress {
                user: prev_user,
                service: prev_service,
                failed,
            } => {
                if *failed >= MAX_FAILURES {
                    return Err(Error::AuthExhausted);
                }
                if *prev_user != user || *prev_service != service {
                    debug!("user changed from {prev_user:?} to {user:?}");
                    return Ok(vec![Message::Disconnect {
                        reason: Disconnect::ProtocolError,
                        description: "username or service changed during authentication"
                            .to_string(),
                        language: String::new(),
                    }]);
                }
                *failed
            }
        };
        debug!("auth request for {user:?}, {failed} failures so far");

        match method {
            AuthMethod::Publickey {
                algo,
                key,
                signature: None,
            } => {
                // A probe: confirm we would accept a signature with this
                // key. Keys of unsupported algorithms never pass.
                let acceptable = match &key {
                    PublicKey::Rsa(_) => algo == key.name(),
                    PublicKey::Unknown { .. } => false,
                };
                if acceptable {
                    Ok(vec![Message::UserauthPkOk {
                        algo,
                        key: key.to_blob(),
                    }])
                } else {
                    self.reject_auth_request()
                }
            }

            AuthMethod::Publickey {
                algo,
                key,
                signature: Some(signature),
            } => {
                let acceptable = match &key {
                    PublicKey::Rsa(_) => algo == key.name(),
                    PublicKey::Unknown { .. } => false,
                };
                let known = lookup(&self.users, &user)
                    .map(|u| u.keys.contains(&key))
                    .unwrap_or(false);
                if acceptable && known && self.verify_auth_signature(
                    &user, &service, &algo, &key, &signature,
                )? {
                    debug!("signature verified, {user:?} authenticated");
                    self.auth = AuthState::Done;
                    self.expected = None;
                    Ok(vec![Message::UserauthSuccess])
                } else {
                    self.reject_auth_request()
                }
            }

            AuthMethod::Password {
                password,
                new_password: None,
            } => {
                let ok = lookup(&self.users, &user)
                    .and_then(|u| u.password.as_ref())
                    .map(|stored| {
                        bool::from(stored.as_bytes().ct_eq(password.as_bytes()))
                    })
                    .unwrap_or(false);
                if ok {
                    debug!("password accepted, {user:?} authenticated");
                    self.auth = AuthState::Done;
                    self.expected = None;
                    Ok(vec![Message::UserauthSuccess])
                } else {
                    self.reject_auth_request()
                }
            }

            // Password changes, hostbased and "none" are never accepted.
            _ => self.reject_auth_request(),
        }
    }

    /// The signed payload binds the session id and the exact request
    /// fields up to the key blob.
    fn verify_auth_signature(
        &self,
        user: &str,
        service: &str,
        algo: &str,
        key: &PublicKey,
        signature: &[u8],
    ) -> Result<bool, Error> {
        let session_id = self.session_id.as_deref().ok_or(Error::Inconsistent)?;
        let mut buf = Vec::new();
        buf.extend_ssh_string(session_id);
        buf.push(msg::USERAUTH_REQUEST);
        buf.extend_ssh_string(user.as_bytes());
        buf.extend_ssh_string(service.as_bytes());
        buf.extend_ssh_string(b"publickey");
        buf.push(1);
        buf.extend_ssh_string(algo.as_bytes());
        buf.extend_ssh_string(&key.to_blob());
        Ok(key.verify_detached(&buf, signature))
    }

    fn reject_auth_request(&mut self) -> Result<Vec<Message>, Error> {
        debug!("rejecting auth request");
        if let AuthState::InProgress { failed, .. } = &mut self.auth {
            *failed += 1;
        }
        Ok(vec![Message::UserauthFailure {
            methods: vec!["publickey".to_string(), "password".to_string()],
            partial_success: false,
        }])
    }
}
