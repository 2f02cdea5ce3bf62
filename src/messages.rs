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

//! Typed forms of every message this library produces or accepts, and
//! their packet bodies.

use crate::encoding::{Encoding, Reader};
use crate::key::PublicKey;
use crate::{msg, Disconnect, Error};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The peer's identification string, without `SSH-2.0-` and without
    /// the line terminator. Synthetic: exchanged before binary framing.
    Version(String),
    Disconnect {
        reason: Disconnect,
        description: String,
        language: String,
    },
    Ignore(Vec<u8>),
    Debug {
        always_display: bool,
        message: String,
        language: String,
    },
    ServiceRequest(String),
    ServiceAccept(String),
    /// A KEXINIT payload, message id included. Kept raw because the
    /// exchange hash covers the exact bytes.
    KexInit(Vec<u8>),
    NewKeys,
    KexDhInit {
        e: Vec<u8>,
    },
    KexDhReply {
        host_key: Vec<u8>,
        f: Vec<u8>,
        signature: Vec<u8>,
    },
    UserauthRequest {
        user: String,
        service: String,
        method: AuthMethod,
    },
    UserauthFailure {
        methods: Vec<String>,
        partial_success: bool,
    },
    UserauthSuccess,
    UserauthPkOk {
        algo: String,
        key: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    None,
    Password {
        password: String,
        new_password: Option<String>,
    },
    Publickey {
        algo: String,
        key: PublicKey,
        signature: Option<Vec<u8>>,
    },
    Hostbased,
    Unknown(String),
}

impl Message {
    pub(crate) fn id(&self) -> u8 {
        match self {
            Message::Version(_) => msg::VERSION,
            Message::Disconnect { .. } => msg::DISCONNECT,
            Message::Ignore(_) => msg::IGNORE,
            Message::Debug { .. } => msg::DEBUG,
            Message::ServiceRequest(_) => msg::SERVICE_REQUEST,
            Message::ServiceAccept(_) => msg::SERVICE_ACCEPT,
            Message::KexInit(_) => msg::KEXINIT,
            Message::NewKeys => msg::NEWKEYS,
            Message::KexDhInit { .. } => msg::KEXDH_INIT,
            Message::KexDhReply { .. } => msg::KEXDH_REPLY,
            Message::UserauthRequest { .. } => msg::USERAUTH_REQUEST,
            Message::UserauthFailure { .. } => msg::USERAUTH_FAILURE,
            Message::UserauthSuccess => msg::USERAUTH_SUCCESS,
            Message::UserauthPkOk { .. } => msg::USERAUTH_PK_OK,
        }
    }

    /// Parse a packet payload. Ids past the userauth layer are
    /// [`Error::Unhandled`].
    pub(crate) fn parse(payload: &[u8]) -> Result<Message, Error> {
        let id = *payload.first().ok_or(Error::Malformed)?;
        let mut r = payload.reader(1);
        match id {
            msg::DISCONNECT => {
                let reason = Disconnect::try_from(r.read_u32()?)?;
                let description = std::str::from_utf8(r.read_string()?)?.to_string();
                let language = std::str::from_utf8(r.read_string()?)?.to_string();
                Ok(Message::Disconnect {
                    reason,
                    description,
                    language,
                })
            }
            msg::IGNORE => Ok(Message::Ignore(r.read_string()?.to_vec())),
            msg::DEBUG => {
                let always_display = r.read_bool()?;
                let message = std::str::from_utf8(r.read_string()?)?.to_string();
                let language = std::str::from_utf8(r.read_string()?)?.to_string();
                Ok(Message::Debug {
                    always_display,
                    message,
                    language,
                })
            }
            msg::SERVICE_REQUEST => Ok(Message::ServiceRequest(
                std::str::from_utf8(r.read_string()?)?.to_string(),
            )),
            msg::SERVICE_ACCEPT => Ok(Message::ServiceAccept(
                std::str::from_utf8(r.read_string()?)?.to_string(),
            )),
            msg::KEXINIT => Ok(Message::KexInit(payload.to_vec())),
            msg::NEWKEYS => Ok(Message::NewKeys),
            msg::KEXDH_INIT => Ok(Message::KexDhInit {
                e: r.read_mpint()?.to_vec(),
            }),
            msg::KEXDH_REPLY => {
                let host_key = r.read_string()?.to_vec();
                let f = r.read_mpint()?.to_vec();
                let signature = r.read_string()?.to_vec();
                Ok(Message::KexDhReply {
                    host_key,
                    f,
                    signature,
                })
            }
            msg::USERAUTH_REQUEST => {
                let user = std::str::from_utf8(r.read_string()?)?.to_string();
                let service = std::str::from_utf8(r.read_string()?)?.to_string();
                let method = std::str::from_utf8(r.read_string()?)?.to_string();
                let method = match method.as_str() {
                    "none" => AuthMethod::None,
                    "password" => {
                        let change = r.read_bool()?;
                        let password = std::str::from_utf8(r.read_string()?)?.to_string();
                        let new_password = if change {
                            Some(std::str::from_utf8(r.read_string()?)?.to_string())
                        } else {
                            None
                        };
                        AuthMethod::Password {
                            password,
                            new_password,
                        }
                    }
                    "publickey" => {
                        let has_signature = r.read_bool()?;
                        let algo = std::str::from_utf8(r.read_string()?)?.to_string();
                        let key = PublicKey::parse_blob(r.read_string()?)?;
                        let signature = if has_signature {
                            Some(r.read_string()?.to_vec())
                        } else {
                            None
                        };
                        AuthMethod::Publickey {
                            algo,
                            key,
                            signature,
                        }
                    }
                    "hostbased" => AuthMethod::Hostbased,
                    name => AuthMethod::Unknown(name.to_string()),
                };
                Ok(Message::UserauthRequest {
                    user,
                    service,
                    method,
                })
            }
            msg::USERAUTH_FAILURE => {
                let methods = std::str::from_utf8(r.read_string()?)?
                    .split(',')
                    .map(|x| x.to_string())
                    .collect();
                let partial_success = r.read_bool()?;
                Ok(Message::UserauthFailure {
                    methods,
                    partial_success,
                })
            }
            msg::USERAUTH_SUCCESS => Ok(Message::UserauthSuccess),
            msg::USERAUTH_PK_OK => {
                let algo = std::str::from_utf8(r.read_string()?)?.to_string();
                let key = r.read_string()?.to_vec();
                Ok(Message::UserauthPkOk { algo, key })
            }
            id => Err(Error::Unhandled(id)),
        }
    }

    /// Write the packet body for this message. The identification string
    /// has no packet form and is rejected here.
    pub(crate) fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            Message::Version(_) => return Err(Error::Inconsistent),
            Message::Disconnect {
                reason,
                description,
                language,
            } => {
                buf.push(msg::DISCONNECT);
                buf.push_u32_be(*reason as u32);
                buf.extend_ssh_string(description.as_bytes());
                buf.extend_ssh_string(language.as_bytes());
            }
            Message::Ignore(data) => {
                buf.push(msg::IGNORE);
                buf.extend_ssh_string(data);
            }
            Message::Debug {
                always_display,
                message,
                language,
            } => {
                buf.push(msg::DEBUG);
                buf.push(*always_display as u8);
                buf.extend_ssh_string(message.as_bytes());
                buf.extend_ssh_string(language.as_bytes());
            }
            Message::ServiceRequest(service) => {
                buf.push(msg::SERVICE_REQUEST);
                buf.extend_ssh_string(service.as_bytes());
            }
            Message::ServiceAccept(service) => {
                buf.push(msg::SERVICE_ACCEPT);
                buf.extend_ssh_string(service.as_bytes());
            }
            Message::KexInit(raw) => {
                if raw.first() != Some(&msg::KEXINIT) {
                    return Err(Error::Inconsistent);
                }
                buf.extend_from_slice(raw);
            }
            Message::NewKeys => buf.push(msg::NEWKEYS),
            Message::KexDhInit { e } => {
                buf.push(msg::KEXDH_INIT);
                buf.extend_ssh_mpint(e);
            }
            Message::KexDhReply {
                host_key,
                f,
                signature,
            } => {
                buf.push(msg::KEXDH_REPLY);
                buf.extend_ssh_string(host_key);
                buf.extend_ssh_mpint(f);
                buf.extend_ssh_string(signature);
            }
            Message::UserauthRequest {
                user,
                service,
                method,
            } => {
                buf.push(msg::USERAUTH_REQUEST);
                buf.extend_ssh_string(user.as_bytes());
                buf.extend_ssh_string(service.as_bytes());
                match method {
                    AuthMethod::None => buf.extend_ssh_string(b"none"),
                    AuthMethod::Hostbased => buf.extend_ssh_string(b"hostbased"),
                    AuthMethod::Unknown(name) => buf.extend_ssh_string(name.as_bytes()),
                    AuthMethod::Password {
                        password,
                        new_password,
                    } => {
                        buf.extend_ssh_string(b"password");
                        buf.push(new_password.is_some() as u8);
                        buf.extend_ssh_string(password.as_bytes());
                        if let Some(new_password) = new_password {
                            buf.extend_ssh_string(new_password.as_bytes());
                        }
                    }
                    AuthMethod::Publickey {
                        algo,
                        key,
                        signature,
                    } => {
                        buf.extend_ssh_string(b"publickey");
                        buf.push(signature.is_some() as u8);
                        buf.extend_ssh_string(algo.as_bytes());
                        buf.extend_ssh_string(&key.to_blob());
                        if let Some(signature) = signature {
                            buf.extend_ssh_string(signature);
                        }
                    }
                }
            }
            Message::UserauthFailure {
                methods,
                partial_success,
            } => {
                buf.push(msg::USERAUTH_FAILURE);
                buf.extend_list(methods.iter());
                buf.push(*partial_success as u8);
            }
            Message::UserauthSuccess => buf.push(msg::USERAUTH_SUCCESS),
            Message::UserauthPkOk { algo, key } => {
                buf.push(msg::USERAUTH_PK_OK);
                buf.extend_ssh_string(algo.as_bytes());
                buf.extend_ssh_string(key);
            }
        }
        Ok(())
    }
}
