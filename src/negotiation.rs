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
use std::borrow::Cow;
use std::str::from_utf8;

use log::debug;
use rand::RngCore;

use crate::cipher::{Cipher, CIPHERS};
use crate::encoding::{Encoding, Reader};
use crate::{cipher, kex, key, mac, msg, AlgorithmKind, Error};

/// The algorithms picked from one KEXINIT exchange.
#[derive(Debug, Clone)]
pub struct Names {
    pub kex: kex::Name,
    pub key: key::Name,
    pub client_cipher: cipher::Name,
    pub server_cipher: cipher::Name,
    pub client_mac: mac::Name,
    pub server_mac: mac::Name,
    pub ignore_guessed: bool,
}

/// Lists of preferred algorithms. This is normally hard-coded into implementations.
#[derive(Debug, Clone)]
pub struct Preferred {
    /// Preferred key exchange algorithms.
    pub kex: Cow<'static, [kex::Name]>,
    /// Preferred host & public key algorithms.
    pub key: Cow<'static, [key::Name]>,
    /// Preferred symmetric ciphers.
    pub cipher: Cow<'static, [cipher::Name]>,
    /// Preferred MAC algorithms.
    pub mac: Cow<'static, [mac::Name]>,
    /// Preferred compression algorithms.
    pub compression: Cow<'static, [&'static str]>,
}

const KEX_ORDER: &[kex::Name] = &[kex::DH_G14_SHA256, kex::DH_G14_SHA1];

const CIPHER_ORDER: &[cipher::Name] = &[
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

const HMAC_ORDER: &[mac::Name] = &[mac::HMAC_SHA512, mac::HMAC_SHA256, mac::HMAC_SHA1];

impl Preferred {
    pub const DEFAULT: Preferred = Preferred {
        kex: Cow::Borrowed(KEX_ORDER),
        key: Cow::Borrowed(&[key::SSH_RSA]),
        cipher: Cow::Borrowed(CIPHER_ORDER),
        mac: Cow::Borrowed(HMAC_ORDER),
        compression: Cow::Borrowed(&["none"]),
    };
}

impl Default for Preferred {
    fn default() -> Preferred {
        Preferred::DEFAULT
    }
}

pub(crate) fn parse_kex_algo_list(list: &[u8]) -> Vec<&str> {
    list.split(|&x| x == b',')
        .map(|x| from_utf8(x).unwrap_or_default())
        .collect()
}

/// Pick the first client-proposed name the server also supports.
pub(crate) fn select<S: AsRef<str> + Clone>(
    server_list: &[S],
    client_list: &[&str],
    kind: AlgorithmKind,
) -> Result<(bool, S), Error> {
    let mut both_first_choice = true;
    for c in client_list {
        for s in server_list {
            if c == &s.as_ref() {
                return Ok((both_first_choice, s.clone()));
            }
            both_first_choice = false
        }
    }
    Err(Error::NoCommonAlgo {
        kind,
        ours: server_list.iter().map(|x| x.as_ref().to_owned()).collect(),
        theirs: client_list.iter().map(|x| (*x).to_owned()).collect(),
    })
}

/// Negotiate against a client KEXINIT payload (message id included).
pub(crate) fn read_kex(buffer: &[u8], pref: &Preferred) -> Result<Names, Error> {
    // Skip the message id and the 16-byte cookie.
    let mut r = buffer.reader(17);

    let kex_string = r.read_string()?;
    let (kex_both_first, kex_algorithm) = select(
        &pref.kex,
        &parse_kex_algo_list(kex_string),
        AlgorithmKind::Kex,
    )?;

    let key_string = r.read_string()?;
    let (key_both_first, key_algorithm) = select(
        &pref.key,
        &parse_kex_algo_list(key_string),
        AlgorithmKind::Key,
    )?;

    let cipher_string = r.read_string()?;
    let (_, client_cipher) = select(
        &pref.cipher,
        &parse_kex_algo_list(cipher_string),
        AlgorithmKind::Cipher,
    )?;
    let cipher_string = r.read_string()?;
    let (_, server_cipher) = select(
        &pref.cipher,
        &parse_kex_algo_list(cipher_string),
        AlgorithmKind::Cipher,
    )?;

    let need_mac = CIPHERS
        .get(&client_cipher)
        .map(|x| x.needs_mac())
        .unwrap_or(false)
        || CIPHERS
            .get(&server_cipher)
            .map(|x| x.needs_mac())
            .unwrap_or(false);

    let client_mac = match select(
        &pref.mac,
        &parse_kex_algo_list(r.read_string()?),
        AlgorithmKind::Mac,
    ) {
        Ok((_, m)) => m,
        Err(e) if need_mac => return Err(e),
        Err(_) => mac::NONE,
    };
    let server_mac = match select(
        &pref.mac,
        &parse_kex_algo_list(r.read_string()?),
        AlgorithmKind::Mac,
    ) {
        Ok((_, m)) => m,
        Err(e) if need_mac => return Err(e),
        Err(_) => mac::NONE,
    };

    // Compression, both directions.
    select(
        &pref.compression,
        &parse_kex_algo_list(r.read_string()?),
        AlgorithmKind::Compression,
    )?;
    select(
        &pref.compression,
        &parse_kex_algo_list(r.read_string()?),
        AlgorithmKind::Compression,
    )?;

    r.read_string()?; // languages client-to-server
    r.read_string()?; // languages server-to-client

    let follows = r.read_byte()? != 0;

    let names = Names {
        kex: kex_algorithm,
        key: key_algorithm,
        client_cipher,
        server_cipher,
        client_mac,
        server_mac,
        // Ignore the next packet if (1) it follows and (2) it's not the correct guess.
        ignore_guessed: follows && !(kex_both_first && key_both_first),
    };
    debug!("negotiated: {names:?}");
    Ok(names)
}

/// Build our KEXINIT payload (message id included).
pub(crate) fn write_kex(prefs: &Preferred, buf: &mut Vec<u8>) {
    buf.push(msg::KEXINIT);

    let mut cookie = [0; 16];
    rand::thread_rng().fill_bytes(&mut cookie);

    buf.extend(&cookie); // cookie
    buf.extend_list(prefs.kex.iter()); // kex algo

    buf.extend_list(prefs.key.iter()); // host key algo

    buf.extend_list(prefs.cipher.iter()); // cipher client to server
    buf.extend_list(prefs.cipher.iter()); // cipher server to client

    buf.extend_list(prefs.mac.iter()); // mac client to server
    buf.extend_list(prefs.mac.iter()); // mac server to client

    buf.extend_list(prefs.compression.iter()); // compress client to server
    buf.extend_list(prefs.compression.iter()); // compress server to client

    buf.write_empty_list(); // languages client to server
    buf.write_empty_list(); // languages server to client

    buf.push(0); // doesn't follow
    buf.extend(&[0, 0, 0, 0]); // reserved
}
