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

//! The key set in effect before the first NEWKEYS in a direction: no
//! encryption, no MAC, but identical framing.

use rand::RngCore;

use super::super::Error;
use crate::mac::MacAlgorithm;

#[derive(Debug)]
pub struct Clear {}

impl super::Cipher for Clear {
    fn key_len(&self) -> usize {
        0
    }

    fn make_opening_key(
        &self,
        _: &[u8],
        _: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Box<dyn super::OpeningKey + Send> {
        Box::new(Clear {})
    }

    fn make_sealing_key(
        &self,
        _: &[u8],
        _: &[u8],
        _: &[u8],
        _: &dyn MacAlgorithm,
    ) -> Box<dyn super::SealingKey + Send> {
        Box::new(Clear {})
    }
}

impl super::OpeningKey for Clear {
    fn decrypt_packet_length(&self, _seqn: u32, encrypted_packet_length: &[u8]) -> [u8; 4] {
        let mut len = [0; 4];
        len.copy_from_slice(encrypted_packet_length);
        len
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn open<'a>(&mut self, _seqn: u32, ciphertext: &'a mut [u8]) -> Result<&'a [u8], Error> {
        ciphertext
            .get(super::PACKET_LENGTH_LEN..)
            .ok_or(Error::Malformed)
    }
}

impl super::SealingKey for Clear {
    fn padding_length(&self, payload: &[u8]) -> usize {
        let block_size = 8;
        let padding_len = block_size
            - ((super::PACKET_LENGTH_LEN + super::PADDING_LENGTH_LEN + payload.len()) % block_size);
        if padding_len < 4 {
            padding_len + block_size
        } else {
            padding_len
        }
    }

    fn fill_padding(&self, padding_out: &mut [u8]) {
        rand::thread_rng().fill_bytes(padding_out);
    }

    fn tag_len(&self) -> usize {
        0
    }

    fn seal(&mut self, _seqn: u32, _plaintext: &mut [u8], _tag: &mut [u8]) {}
}
