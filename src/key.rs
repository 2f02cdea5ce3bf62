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

//! Host and user keys: the canonical `ssh-rsa` wire blob, detached
//! signatures over exchange hashes and userauth payloads, and their
//! verification.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign};
use sha1::{Digest, Sha1};

use crate::encoding::{Encoding, Reader};
use crate::Error;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Name(pub(crate) &'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// `ssh-rsa`
pub const SSH_RSA: Name = Name("ssh-rsa");

/// A public key presented by a peer. Keys of algorithms this library
/// does not implement are kept as [`PublicKey::Unknown`]; they can be
/// re-encoded but never verify anything.
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    Unknown { name: String, blob: Vec<u8> },
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PublicKey::Rsa(_) => write!(f, "PublicKey::Rsa {{ (hidden) }}"),
            PublicKey::Unknown { name, .. } => write!(f, "PublicKey::Unknown({name:?})"),
        }
    }
}

impl PublicKey {
    /// The algorithm name that goes on the wire with this key.
    pub fn name(&self) -> &str {
        match self {
            PublicKey::Rsa(_) => SSH_RSA.0,
            PublicKey::Unknown { name, .. } => name,
        }
    }

    /// Canonical public key blob, `string "ssh-rsa" || mpint e || mpint n`
    /// for RSA keys.
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            PublicKey::Rsa(key) => {
                let mut blob = Vec::new();
                blob.extend_ssh_string(SSH_RSA.0.as_bytes());
                blob.extend_ssh_mpint(&key.e().to_bytes_be());
                blob.extend_ssh_mpint(&key.n().to_bytes_be());
                blob
            }
            PublicKey::Unknown { blob, .. } => blob.clone(),
        }
    }

    /// Parse a public key blob. An unrecognized algorithm name yields
    /// [`PublicKey::Unknown`]; a recognized name with a bad body is
    /// [`Error::Malformed`].
    pub fn parse_blob(blob: &[u8]) -> Result<Self, Error> {
        let mut r = blob.reader(0);
        let name = r.read_string()?;
        if name == SSH_RSA.0.as_bytes() {
            let e = r.read_mpint()?;
            let n = r.read_mpint()?;
            let key = rsa::RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                .map_err(|_| Error::Malformed)?;
            Ok(PublicKey::Rsa(key))
        } else {
            Ok(PublicKey::Unknown {
                name: std::str::from_utf8(name)?.to_string(),
                blob: blob.to_vec(),
            })
        }
    }

    /// Verify a signature blob (`string algo || string signature`) over
    /// `msg`. Unknown keys always fail.
    pub fn verify_detached(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Rsa(key) => {
                let mut r = sig.reader(0);
                let (algo, raw) = match (r.read_string(), r.read_string()) {
                    (Ok(algo), Ok(raw)) => (algo, raw),
                    _ => return false,
                };
                algo == SSH_RSA.0.as_bytes()
                    && key
                        .verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(msg), raw)
                        .is_ok()
            }
            PublicKey::Unknown { .. } => false,
        }
    }
}

/// A host key pair. Held by value for the lifetime of a session; the
/// private material is zeroized on drop by the `rsa` crate.
#[derive(Clone)]
pub enum KeyPair {
    Rsa(rsa::RsaPrivateKey),
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "KeyPair::Rsa {{ (hidden) }}")
    }
}

impl KeyPair {
    pub fn generate_rsa(bits: usize) -> Result<Self, Error> {
        Ok(KeyPair::Rsa(rsa::RsaPrivateKey::new(
            &mut rand::thread_rng(),
            bits,
        )?))
    }

    pub fn name(&self) -> &str {
        match self {
            KeyPair::Rsa(_) => SSH_RSA.0,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
        }
    }

    /// Sign `msg`, returning the signature blob
    /// (`string algo || string signature`).
    pub fn sign_detached(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            KeyPair::Rsa(key) => {
                let sig = key.sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(msg))?;
                let mut blob = Vec::new();
                blob.extend_ssh_string(SSH_RSA.0.as_bytes());
                blob.extend_ssh_string(&sig);
                Ok(blob)
            }
        }
    }
}
