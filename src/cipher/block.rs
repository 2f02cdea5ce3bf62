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

use std::marker::PhantomData;

use aes::cipher::{IvSizeUser, KeyIvInit, KeySizeUser, StreamCipher};
use generic_array::GenericArray;
use rand::RngCore;

use super::super::Error;
use crate::mac::{Mac, MacAlgorithm};

pub struct SshBlockCipher<C: StreamCipher + KeySizeUser + IvSizeUser>(pub PhantomData<C>);

impl<C: StreamCipher + KeySizeUser + IvSizeUser + KeyIvInit + Clone + Send + 'static> super::Cipher
    for SshBlockCipher<C>
{
    fn needs_mac(&self) -> bool {
        true
    }

    fn key_len(&self) -> usize {
        C::key_size()
    }

    fn nonce_len(&self) -> usize {
        C::iv_size()
    }

    fn make_opening_key(
        &self,
        k: &[u8],
        n: &[u8],
        m: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Box<dyn super::OpeningKey + Send> {
        let mut key = GenericArray::<u8, C::KeySize>::default();
        let mut nonce = GenericArray::<u8, C::IvSize>::default();
        key.clone_from_slice(k);
        nonce.clone_from_slice(n);
        Box::new(OpeningKey {
            cipher: C::new(&key, &nonce),
            mac: mac.make_mac(m),
        })
    }

    fn make_sealing_key(
        &self,
        k: &[u8],
        n: &[u8],
        m: &[u8],
        mac: &dyn MacAlgorithm,
    ) -> Box<dyn super::SealingKey + Send> {
        let mut key = GenericArray::<u8, C::KeySize>::default();
        let mut nonce = GenericArray::<u8, C::IvSize>::default();
        key.clone_from_slice(k);
        nonce.clone_from_slice(n);
        Box::new(SealingKey {
            cipher: C::new(&key, &nonce),
            mac: mac.make_mac(m),
        })
    }
}

pub struct OpeningKey<C: StreamCipher> {
    cipher: C,
    mac: Box<dyn Mac + Send>,
}

pub struct SealingKey<C: StreamCipher> {
    cipher: C,
    mac: Box<dyn Mac + Send>,
}

impl<C: StreamCipher + Clone> super::OpeningKey for OpeningKey<C> {
    fn decrypt_packet_length(&self, _seqn: u32, encrypted_packet_length: &[u8]) -> [u8; 4] {
        // Peek at the length without advancing the keystream.
        let mut cipher = self.cipher.clone();
        let mut len = [0; 4];
        len.copy_from_slice(encrypted_packet_length);
        cipher.apply_keystream(&mut len);
        len
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn open<'a>(&mut self, seqn: u32, ciphertext_and_tag: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let record_end = ciphertext_and_tag
            .len()
            .checked_sub(self.mac.mac_len())
            .ok_or(Error::Malformed)?;
        let (record, tag) = ciphertext_and_tag.split_at_mut(record_end);
        self.cipher.apply_keystream(record);

        // The MAC covers the plaintext record, length field included.
        if !self.mac.verify(seqn, record, tag) {
            return Err(Error::PacketAuth);
        }

        record.get(super::PACKET_LENGTH_LEN..).ok_or(Error::Malformed)
    }
}

impl<C: StreamCipher> super::SealingKey for SealingKey<C> {
    fn padding_length(&self, payload: &[u8]) -> usize {
        let block_size = 16;
        let extra_len = super::PACKET_LENGTH_LEN + super::PADDING_LENGTH_LEN + self.tag_len();
        let padding_len = if payload.len() + extra_len <= super::MINIMUM_PACKET_LEN {
            super::MINIMUM_PACKET_LEN
                - payload.len()
                - super::PADDING_LENGTH_LEN
                - super::PACKET_LENGTH_LEN
        } else {
            block_size
                - ((super::PACKET_LENGTH_LEN + super::PADDING_LENGTH_LEN + payload.len())
                    % block_size)
        };
        if padding_len < super::PACKET_LENGTH_LEN {
            padding_len + block_size
        } else {
            padding_len
        }
    }

    fn fill_padding(&self, padding_out: &mut [u8]) {
        rand::thread_rng().fill_bytes(padding_out);
    }

    fn tag_len(&self) -> usize {
        self.mac.mac_len()
    }

    fn seal(&mut self, seqn: u32, plaintext_in_ciphertext_out: &mut [u8], tag_out: &mut [u8]) {
        self.mac.compute(seqn, plaintext_in_ciphertext_out, tag_out);
        self.cipher.apply_keystream(plaintext_in_ciphertext_out);
    }
}
