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

//!
//! This module exports kex algorithm names for use with [Preferred].

use std::marker::PhantomData;

use digest::Digest;
use hex_literal::hex;
use num_bigint::{BigUint, RandBigInt};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipher::{CipherPair, CIPHERS};
use crate::encoding::Encoding;
use crate::mac::MACS;
use crate::session::Exchange;
use crate::{cipher, mac, Error};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct Name(&'static str);
impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// `diffie-hellman-group14-sha1`
pub const DH_G14_SHA1: Name = Name("diffie-hellman-group14-sha1");
/// `diffie-hellman-group14-sha256`
pub const DH_G14_SHA256: Name = Name("diffie-hellman-group14-sha256");

pub const ALL_KEX_ALGORITHMS: &[&Name] = &[&DH_G14_SHA1, &DH_G14_SHA256];

#[derive(Clone)]
pub(crate) struct DhGroup {
    prime: &'static [u8],
    generator: &'static [u8],
}

pub(crate) const DH_GROUP14: DhGroup = DhGroup {
    prime: hex!(
        "
        FFFFFFFF FFFFFFFF C90FDAA2 2168C234 C4C6628B 80DC1CD1
        29024E08 8A67CC74 020BBEA6 3B139B22 514A0879 8E3404DD
        EF9519B3 CD3A431B 302B0A6D F25F1437 4FE1356D 6D51C245
        E485B576 625E7EC6 F44C42E9 A637ED6B 0BFF5CB6 F406B7ED
        EE386BFB 5A899FA5 AE9F2411 7C4B1FE6 49286651 ECE45B3D
        C2007CB8 A163BF05 98DA4836 1C55D39A 69163FA8 FD24CF5F
        83655D23 DCA3AD96 1C62F356 208552BB 9ED52907 7096966D
        670C354E 4ABC9804 F1746C08 CA18217C 32905E46 2E36CE3B
        E39E772C 180E8603 9B2783A2 EC07A28F B5C55DF0 6F4C52C9
        DE2BCBF6 95581718 3995497C EA956AE5 15D22618 98FA0510
        15728E5A 8AACAA68 FFFFFFFF FFFFFFFF
        "
    )
    .as_slice(),
    generator: &[2],
};

#[derive(Debug, Clone)]
pub(crate) struct DH {
    prime_num: BigUint,
    generator: BigUint,
    private_key: BigUint,
    public_key: BigUint,
    shared_secret: BigUint,
}

impl DH {
    pub fn new(group: &DhGroup) -> Self {
        Self {
            prime_num: BigUint::from_bytes_be(group.prime),
            generator: BigUint::from_bytes_be(group.generator),
            private_key: BigUint::default(),
            public_key: BigUint::default(),
            shared_secret: BigUint::default(),
        }
    }

    pub fn generate_private_key(&mut self) {
        let q = (&self.prime_num - &BigUint::from(1u8)) / &BigUint::from(2u8);
        let mut rng = rand::thread_rng();
        self.private_key = rng.gen_biguint_range(&BigUint::from(2u8), &q);
    }

    pub fn generate_public_key(&mut self) -> BigUint {
        self.public_key = self.generator.modpow(&self.private_key, &self.prime_num);
        self.public_key.clone()
    }

    pub fn compute_shared_secret(&mut self, other_public_key: BigUint) -> BigUint {
        self.shared_secret = other_public_key.modpow(&self.private_key, &self.prime_num);
        self.shared_secret.clone()
    }

    pub fn validate_public_key(&self, public_key: &BigUint) -> bool {
        let one = BigUint::from(1u8);
        let prime_minus_one = &self.prime_num - &one;

        public_key > &one && public_key < &prime_minus_one
    }

    pub fn validate_shared_secret(&self, shared_secret: &BigUint) -> bool {
        let one = BigUint::from(1u8);
        let prime_minus_one = &self.prime_num - &one;

        shared_secret > &one && shared_secret < &prime_minus_one
    }

    pub fn decode_public_key(buffer: &[u8]) -> BigUint {
        BigUint::from_bytes_be(buffer)
    }
}

pub(crate) struct DhGroupKex<D: Digest> {
    dh: DH,
    shared_secret: Option<Zeroizing<Vec<u8>>>,
    _digest: PhantomData<D>,
}

impl<D: Digest> DhGroupKex<D> {
    pub(crate) fn new(group: &DhGroup) -> DhGroupKex<D> {
        DhGroupKex {
            dh: DH::new(group),
            shared_secret: None,
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> std::fmt::Debug for DhGroupKex<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Algorithm {{ local_secret: [hidden], shared_secret: [hidden] }}",
        )
    }
}

impl<D: Digest> DhGroupKex<D> {
    /// Take the peer's public value `e`, pick our secret, and fill the
    /// exchange with both ephemeral values.
    fn server_dh(&mut self, exchange: &mut Exchange, client_pubkey: &[u8]) -> Result<(), Error> {
        let decoded_client_pubkey = DH::decode_public_key(client_pubkey);
        if !self.dh.validate_public_key(&decoded_client_pubkey) {
            return Err(Error::Kex);
        }

        self.dh.generate_private_key();
        let server_pubkey = self.dh.generate_public_key();
        if !self.dh.validate_public_key(&server_pubkey) {
            return Err(Error::Kex);
        }

        exchange.client_ephemeral = client_pubkey.to_vec();
        exchange.server_ephemeral = server_pubkey.to_bytes_be();

        let shared = self.dh.compute_shared_secret(decoded_client_pubkey);
        if !self.dh.validate_shared_secret(&shared) {
            return Err(Error::Kex);
        }
        self.shared_secret = Some(Zeroizing::new(shared.to_bytes_be()));
        Ok(())
    }

    /// `H = HASH(V_C || V_S || I_C || I_S || K_S || e || f || K)`, every
    /// component encoded per RFC 4253 section 8.
    fn compute_exchange_hash(
        &self,
        server_host_key_blob: &[u8],
        exchange: &Exchange,
    ) -> Result<Vec<u8>, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::Kex)?;

        let mut buffer = Vec::new();
        buffer.extend_ssh_string(&exchange.client_id);
        buffer.extend_ssh_string(&exchange.server_id);
        buffer.extend_ssh_string(&exchange.client_kex_init);
        buffer.extend_ssh_string(&exchange.server_kex_init);
        buffer.extend_ssh_string(server_host_key_blob);
        buffer.extend_ssh_mpint(&exchange.client_ephemeral);
        buffer.extend_ssh_mpint(&exchange.server_ephemeral);
        buffer.extend_ssh_mpint(shared);

        let mut hasher = D::new();
        hasher.update(&buffer);
        Ok(hasher.finalize().to_vec())
    }

    fn compute_keys(
        &self,
        session_id: &[u8],
        exchange_hash: &[u8],
        client_cipher: cipher::Name,
        server_cipher: cipher::Name,
        client_mac: mac::Name,
        server_mac: mac::Name,
        is_server: bool,
    ) -> Result<CipherPair, Error> {
        let shared = self.shared_secret.as_ref().ok_or(Error::Kex)?;
        compute_keys::<D>(
            shared,
            session_id,
            exchange_hash,
            client_cipher,
            server_cipher,
            client_mac,
            server_mac,
            is_server,
        )
    }
}

pub(crate) enum KexAlgorithm {
    DhGroup14Sha1(DhGroupKex<Sha1>),
    DhGroup14Sha256(DhGroupKex<Sha256>),
}

impl KexAlgorithm {
    pub fn make(name: Name) -> Result<KexAlgorithm, Error> {
        if name == DH_G14_SHA1 {
            Ok(KexAlgorithm::DhGroup14Sha1(DhGroupKex::new(&DH_GROUP14)))
        } else if name == DH_G14_SHA256 {
            Ok(KexAlgorithm::DhGroup14Sha256(DhGroupKex::new(&DH_GROUP14)))
        } else {
            Err(Error::UnknownAlgo)
        }
    }

    pub fn server_dh(&mut self, exchange: &mut Exchange, client_pubkey: &[u8]) -> Result<(), Error> {
        match self {
            KexAlgorithm::DhGroup14Sha1(kex) => kex.server_dh(exchange, client_pubkey),
            KexAlgorithm::DhGroup14Sha256(kex) => kex.server_dh(exchange, client_pubkey),
        }
    }

    pub fn compute_exchange_hash(
        &self,
        server_host_key_blob: &[u8],
        exchange: &Exchange,
    ) -> Result<Vec<u8>, Error> {
        match self {
            KexAlgorithm::DhGroup14Sha1(kex) => {
                kex.compute_exchange_hash(server_host_key_blob, exchange)
            }
            KexAlgorithm::DhGroup14Sha256(kex) => {
                kex.compute_exchange_hash(server_host_key_blob, exchange)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_keys(
        &self,
        session_id: &[u8],
        exchange_hash: &[u8],
        client_cipher: cipher::Name,
        server_cipher: cipher::Name,
        client_mac: mac::Name,
        server_mac: mac::Name,
        is_server: bool,
    ) -> Result<CipherPair, Error> {
        match self {
            KexAlgorithm::DhGroup14Sha1(kex) => kex.compute_keys(
                session_id,
                exchange_hash,
                client_cipher,
                server_cipher,
                client_mac,
                server_mac,
                is_server,
            ),
            KexAlgorithm::DhGroup14Sha256(kex) => kex.compute_keys(
                session_id,
                exchange_hash,
                client_cipher,
                server_cipher,
                client_mac,
                server_mac,
                is_server,
            ),
        }
    }
}

/// Derive the six keying streams of RFC 4253 section 7.2 and install
/// them into cipher and MAC instances for both directions.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_keys<D: Digest>(
    shared_secret: &[u8],
    session_id: &[u8],
    exchange_hash: &[u8],
    client_cipher: cipher::Name,
    server_cipher: cipher::Name,
    client_mac: mac::Name,
    server_mac: mac::Name,
    is_server: bool,
) -> Result<CipherPair, Error> {
    let (local_to_remote_cipher, remote_to_local_cipher) = if is_server {
        (server_cipher, client_cipher)
    } else {
        (client_cipher, server_cipher)
    };
    let (local_to_remote_mac, remote_to_local_mac) = if is_server {
        (server_mac, client_mac)
    } else {
        (client_mac, server_mac)
    };

    let local_to_remote = CIPHERS
        .get(&local_to_remote_cipher)
        .ok_or(Error::UnknownAlgo)?;
    let remote_to_local = CIPHERS
        .get(&remote_to_local_cipher)
        .ok_or(Error::UnknownAlgo)?;
    let local_to_remote_mac = *MACS.get(&local_to_remote_mac).ok_or(Error::UnknownAlgo)?;
    let remote_to_local_mac = *MACS.get(&remote_to_local_mac).ok_or(Error::UnknownAlgo)?;

    // The shared secret enters every hash as an mpint.
    let mut secret = Zeroizing::new(Vec::new());
    secret.extend_ssh_mpint(shared_secret);

    let compute_key = |c: u8, len: usize| -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(Vec::new());

        let mut hasher = D::new();
        hasher.update(secret.as_slice());
        hasher.update(exchange_hash);
        hasher.update([c]);
        hasher.update(session_id);
        key.extend(hasher.finalize().as_slice());

        while key.len() < len {
            // extend.
            let mut hasher = D::new();
            hasher.update(secret.as_slice());
            hasher.update(exchange_hash);
            hasher.update(key.as_slice());
            let hash = hasher.finalize();
            key.extend(hash.as_slice());
        }

        key.truncate(len);
        key
    };

    let (local_to_remote_key, remote_to_local_key) = if is_server {
        (b'D', b'C')
    } else {
        (b'C', b'D')
    };
    let (local_to_remote_nonce, remote_to_local_nonce) = if is_server {
        (b'B', b'A')
    } else {
        (b'A', b'B')
    };
    let (local_to_remote_mac_key, remote_to_local_mac_key) = if is_server {
        (b'F', b'E')
    } else {
        (b'E', b'F')
    };

    let key = compute_key(local_to_remote_key, local_to_remote.key_len());
    let nonce = compute_key(local_to_remote_nonce, local_to_remote.nonce_len());
    let mac = compute_key(local_to_remote_mac_key, local_to_remote_mac.key_len());
    let local_to_remote = local_to_remote.make_sealing_key(&key, &nonce, &mac, local_to_remote_mac);

    let key = compute_key(remote_to_local_key, remote_to_local.key_len());
    let nonce = compute_key(remote_to_local_nonce, remote_to_local.nonce_len());
    let mac = compute_key(remote_to_local_mac_key, remote_to_local_mac.key_len());
    let remote_to_local = remote_to_local.make_opening_key(&key, &nonce, &mac, remote_to_local_mac);

    Ok(CipherPair {
        local_to_remote,
        remote_to_local,
    })
}
