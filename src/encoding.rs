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

//! Encoders and decoders for the SSH wire types of RFC 4251 section 5.

use crate::Error;

#[doc(hidden)]
pub trait Bytes {
    fn bytes(&self) -> &[u8];
}

impl<A: AsRef<str>> Bytes for A {
    fn bytes(&self) -> &[u8] {
        self.as_ref().as_bytes()
    }
}

/// Writing the SSH binary types into a buffer.
pub trait Encoding {
    /// Push a big-endian `uint32`.
    fn push_u32_be(&mut self, i: u32);
    /// Push a length-prefixed `string`.
    fn extend_ssh_string(&mut self, s: &[u8]);
    /// Push an `mpint`: two's complement big-endian with minimal leading
    /// padding.
    fn extend_ssh_mpint(&mut self, s: &[u8]);
    /// Push a comma-separated `name-list`.
    fn extend_list<A: Bytes, I: Iterator<Item = A>>(&mut self, list: I);
    /// Push an empty `name-list`.
    fn write_empty_list(&mut self);
}

impl Encoding for Vec<u8> {
    fn push_u32_be(&mut self, i: u32) {
        self.extend_from_slice(&i.to_be_bytes())
    }

    fn extend_ssh_string(&mut self, s: &[u8]) {
        self.push_u32_be(s.len() as u32);
        self.extend_from_slice(s);
    }

    #[allow(clippy::indexing_slicing)] // length checked
    fn extend_ssh_mpint(&mut self, s: &[u8]) {
        // Skip initial 0s.
        let mut i = 0;
        while i < s.len() && s[i] == 0 {
            i += 1
        }
        if i >= s.len() {
            self.push_u32_be(0);
            return;
        }
        // If the first non-zero is >= 128, write its length (u32, BE), followed by 0.
        if s[i] & 0x80 != 0 {
            self.push_u32_be((s.len() - i + 1) as u32);
            self.push(0)
        } else {
            self.push_u32_be((s.len() - i) as u32);
        }
        self.extend_from_slice(&s[i..]);
    }

    fn extend_list<A: Bytes, I: Iterator<Item = A>>(&mut self, list: I) {
        let len0 = self.len();
        self.push_u32_be(0);
        let mut first = true;
        for i in list {
            if !first {
                self.push(b',')
            } else {
                first = false;
            }
            self.extend_from_slice(i.bytes())
        }
        let len = (self.len() - len0 - 4) as u32;
        #[allow(clippy::indexing_slicing)] // length checked
        self[len0..len0 + 4].copy_from_slice(&len.to_be_bytes());
    }

    fn write_empty_list(&mut self) {
        self.extend_from_slice(&[0, 0, 0, 0])
    }
}

/// A cursor over a received buffer. Every read fails with
/// [`Error::Malformed`] when the remaining bytes cannot hold the field.
#[derive(Debug)]
pub struct Position<'a> {
    pub s: &'a [u8],
    pub position: usize,
}

pub trait Reader {
    fn reader(&self, starting_at: usize) -> Position;
}

impl Reader for [u8] {
    fn reader(&self, starting_at: usize) -> Position {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

impl Reader for Vec<u8> {
    fn reader(&self, starting_at: usize) -> Position {
        Position {
            s: self,
            position: starting_at,
        }
    }
}

impl<'a> Position<'a> {
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        let b = *self.s.get(self.position).ok_or(Error::Malformed)?;
        self.position += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let s = self
            .s
            .get(self.position..self.position + 4)
            .ok_or(Error::Malformed)?;
        let mut u = [0; 4];
        u.copy_from_slice(s);
        self.position += 4;
        Ok(u32::from_be_bytes(u))
    }

    pub fn read_string(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        let s = self
            .s
            .get(self.position..self.position.checked_add(len).ok_or(Error::Malformed)?)
            .ok_or(Error::Malformed)?;
        self.position += len;
        Ok(s)
    }

    pub fn read_mpint(&mut self) -> Result<&'a [u8], Error> {
        self.read_string()
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_byte()? != 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod test {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        buf.extend_ssh_string(b"some data");
        assert_eq!(&buf[..4], &[0, 0, 0, 9]);
        let mut r = buf.reader(0);
        assert_eq!(r.read_string().unwrap(), b"some data");
        assert!(r.read_byte().is_err());
    }

    #[test]
    fn test_mpint_minimal_form() {
        // Leading zeros are stripped.
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0, 0, 1, 2]);
        assert_eq!(buf, [0, 0, 0, 2, 1, 2]);

        // A set high bit gets one zero byte of padding back.
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0x80, 1]);
        assert_eq!(buf, [0, 0, 0, 3, 0, 0x80, 1]);

        // Zero is the empty mpint.
        let mut buf = Vec::new();
        buf.extend_ssh_mpint(&[0, 0]);
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_reads_fail() {
        let buf = vec![0, 0, 0, 10, b'x'];
        let mut r = buf.reader(0);
        assert!(matches!(r.read_string(), Err(Error::Malformed)));

        let buf = vec![0, 0];
        let mut r = buf.reader(0);
        assert!(matches!(r.read_u32(), Err(Error::Malformed)));
    }

    #[test]
    fn test_name_list() {
        let mut buf = Vec::new();
        buf.extend_list(["a", "bc", "def"].iter());
        assert_eq!(&buf[..], &[0, 0, 0, 8, b'a', b',', b'b', b'c', b',', b'd', b'e', b'f']);

        let mut buf = Vec::new();
        buf.write_empty_list();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }
}
