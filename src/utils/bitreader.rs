use crate::utils::error::{JexelError, JexelResult};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Bit-level reader over a JPEG stream.
///
/// Marker segments are parsed with the byte-oriented methods (`read_u8`,
/// `read_u16`, `skip_segment`), which must only be used while the bit
/// accumulator is empty. Entropy-coded data is consumed through the
/// accumulator, which transparently removes 0xFF/0x00 byte stuffing and
/// stops at the first real marker.
///
/// The accumulator is 32 bits wide and MSB-aligned: the next bit of the
/// stream is always bit 31 of `buffer`. A refill pulls whole bytes until
/// more than 24 bits are buffered. When a marker (0xFF followed by a
/// non-zero byte) is encountered, the reader seeks back two bytes so the
/// caller can observe the marker, and every later refill shifts in zero
/// bytes instead.
#[derive(Debug)]
pub struct BitReader<R: Read + Seek> {
    reader: R,
    buffer: u32,
    bits_in_buffer: u32,
    hit_marker: bool,
}

impl<R: Read + Seek> BitReader<R> {
    pub fn new(reader: R) -> Self {
        BitReader {
            reader,
            buffer: 0,
            bits_in_buffer: 0,
            hit_marker: false,
        }
    }

    /// Reads a single byte. Bypasses the bit accumulator.
    pub fn read_u8(&mut self) -> JexelResult<u8> {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Reads a big-endian 16-bit value. Bypasses the bit accumulator.
    pub fn read_u16(&mut self) -> JexelResult<u16> {
        let high = self.read_u8()? as u16;
        let low = self.read_u8()? as u16;
        Ok((high << 8) | low)
    }

    /// Skips `n` bytes of the underlying stream.
    pub fn skip(&mut self, n: i64) -> JexelResult<()> {
        self.reader.seek(SeekFrom::Current(n))?;
        Ok(())
    }

    /// Skips a length-prefixed marker segment. The 16-bit length includes
    /// the two length bytes themselves.
    pub fn skip_segment(&mut self) -> JexelResult<()> {
        let length = self.read_u16()?;

        if length < 2 {
            return Err(JexelError::CorruptJpeg(format!(
                "segment length {} shorter than its own length field",
                length
            )));
        }

        self.skip(length as i64 - 2)
    }

    /// Number of valid bits currently buffered.
    pub fn bits_available(&self) -> u32 {
        self.bits_in_buffer
    }

    /// Returns the top `n` buffered bits without consuming them.
    pub fn peek_bits(&self, n: u32) -> u32 {
        if n == 0 {
            0
        } else {
            self.buffer >> (32 - n)
        }
    }

    /// Discards the top `n` buffered bits. Callers must have checked that
    /// at least `n` bits are buffered.
    pub fn consume_bits(&mut self, n: u32) {
        self.buffer <<= n;
        self.bits_in_buffer -= n;
    }

    /// Refills the accumulator until more than 24 bits are buffered.
    ///
    /// A refill that runs into a marker or the end of the stream stops
    /// short; refills after that point shift in zero bytes.
    pub fn fill_bits(&mut self) -> JexelResult<()> {
        while self.bits_in_buffer <= 24 {
            if self.hit_marker {
                self.bits_in_buffer += 8;
                continue;
            }

            match self.next_stream_byte()? {
                Some(byte) => {
                    self.buffer |= (byte as u32) << (24 - self.bits_in_buffer);
                    self.bits_in_buffer += 8;
                }
                None => return Ok(()),
            }
        }

        Ok(())
    }

    /// Pulls the next entropy-coded byte, undoing 0xFF/0x00 stuffing.
    ///
    /// Returns `None` once a marker or the end of input is reached; in the
    /// marker case the stream is rewound so it points at the 0xFF.
    fn next_stream_byte(&mut self) -> JexelResult<Option<u8>> {
        let byte = match self.try_read_byte()? {
            Some(byte) => byte,
            None => return Ok(None),
        };

        if byte != 0xFF {
            return Ok(Some(byte));
        }

        loop {
            match self.try_read_byte()? {
                // Stuffed 0xFF data byte
                Some(0x00) => return Ok(Some(0xFF)),
                // Fill byte, only the last 0xFF of a run matters
                Some(0xFF) => continue,
                Some(_) => {
                    self.reader.seek(SeekFrom::Current(-2))?;
                    self.hit_marker = true;
                    return Ok(None);
                }
                None => return Ok(None),
            }
        }
    }

    fn try_read_byte(&mut self) -> JexelResult<Option<u8>> {
        let mut byte = [0u8; 1];

        match self.reader.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.hit_marker = true;
                Ok(None)
            }
            Err(e) => Err(JexelError::from(e)),
        }
    }

    /// Reads `n` bits (0..=16) as an unsigned value, MSB-first.
    ///
    /// Past the end of the entropy data this keeps producing zero bits,
    /// matching the zero-refill contract.
    pub fn read_bits(&mut self, n: u8) -> JexelResult<u32> {
        if n == 0 {
            return Ok(0);
        }

        if n > 16 {
            return Err(JexelError::CorruptJpeg(format!(
                "bit read of width {} out of range",
                n
            )));
        }

        if self.bits_in_buffer < n as u32 {
            self.fill_bits()?;

            if self.bits_in_buffer < n as u32 {
                return Ok(0);
            }
        }

        let value = self.peek_bits(n as u32);
        self.consume_bits(n as u32);

        Ok(value)
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> JexelResult<u32> {
        self.read_bits(1)
    }

    /// Reads `n` bits as a JPEG-style signed integer: the raw value if the
    /// top bit is set, otherwise `value - (2^n - 1)`.
    pub fn read_signed(&mut self, n: u8) -> JexelResult<i32> {
        let value = self.read_bits(n)?;
        Ok(Self::extend(value, n))
    }

    fn extend(value: u32, n: u8) -> i32 {
        if n == 0 {
            return 0;
        }

        if value >> (n - 1) != 0 {
            value as i32
        } else {
            value as i32 - ((1i32 << n) - 1)
        }
    }

    /// Drops all buffered bits and clears the end-of-data latch. Called at
    /// scan start and on every restart marker.
    pub fn clear_buffer(&mut self) {
        self.buffer = 0;
        self.bits_in_buffer = 0;
        self.hit_marker = false;
    }
}
