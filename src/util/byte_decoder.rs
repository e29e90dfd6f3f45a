// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// A simple alias to make things a bit clearer.  In essence, this
/// generates a decoding error from a given byte in the stream.
type DecodingErrorFn<T, E> = fn(T) -> E;

/// Utility for pulling structured data out of a bytestream.  All
/// multi-byte reads assume a _big endian_ representation.  This is
/// primarily used for decoding compiled script containers.
pub struct ByteDecoder<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> ByteDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    /// Current position within the underlying byte sequence.
    pub fn offset(&self) -> usize {
        self.index
    }

    /// Check whether any bytes remain in the stream.
    pub fn is_eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    /// Attempt to match a given `u8` byte in the bytestream at the
    /// present position.  If the match fails, an error is generated
    /// using the provided decoding error generator.
    pub fn match_u8<E: Default>(&mut self, n: u8, ef: DecodingErrorFn<u8, E>) -> Result<(), E> {
        let m = self.decode_u8()?;
        if m == n {
            Ok(())
        } else {
            Err(ef(m))
        }
    }

    /// Attempt to match a given byte sequence at the present
    /// position, generating an error if the stream differs.
    pub fn match_bytes<E: Default>(&mut self, bytes: &[u8], err: E) -> Result<(), E> {
        let m = self.decode_bytes(bytes.len())?;
        if m == bytes {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Read the next byte from the sequence, and move our position to
    /// the next byte in the sequence.  If no such byte is available
    /// (i.e. we have reached the end of the byte sequence), then an
    /// error is reported.
    pub fn decode_u8<E: Default>(&mut self) -> Result<u8, E> {
        if self.index < self.bytes.len() {
            let next = self.bytes[self.index];
            self.index += 1;
            Ok(next)
        } else {
            Err(E::default())
        }
    }

    /// Read the next 16bit word from the sequence, whilst moving our
    /// position past it.
    pub fn decode_u16<E: Default>(&mut self) -> Result<u16, E> {
        let msb = self.decode_u8()?;
        let lsb = self.decode_u8()?;
        Ok(u16::from_be_bytes([msb, lsb]))
    }

    /// Read the next 16bit signed word from the sequence.
    pub fn decode_i16<E: Default>(&mut self) -> Result<i16, E> {
        Ok(self.decode_u16()? as i16)
    }

    /// Read the next 32bit word from the sequence.
    pub fn decode_u32<E: Default>(&mut self) -> Result<u32, E> {
        let bytes = self.decode_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read the next 32bit signed word from the sequence.
    pub fn decode_i32<E: Default>(&mut self) -> Result<i32, E> {
        Ok(self.decode_u32()? as i32)
    }

    /// Read the next 32bit IEEE-754 value from the sequence.
    pub fn decode_f32<E: Default>(&mut self) -> Result<f32, E> {
        Ok(f32::from_bits(self.decode_u32()?))
    }

    /// Read the next `n` bytes from the sequence, whilst moving our
    /// position to the following byte.  If there are insufficient
    /// bytes remaining, then an error is reported.
    pub fn decode_bytes<E: Default>(&mut self, length: usize) -> Result<&'a [u8], E> {
        let start = self.index;
        self.index += length;
        if self.index <= self.bytes.len() {
            Ok(&self.bytes[start..self.index])
        } else {
            Err(E::default())
        }
    }
}
