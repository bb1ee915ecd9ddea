// Variable-length integers (RFC 9000 §16) as used by binary HTTP framing

use super::BhttpError;

/// Largest value a variable-length integer can carry (2^62 - 1)
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Append `value` in the shortest variable-length encoding.
pub fn write_varint(buf: &mut Vec<u8>, value: u64) -> Result<(), BhttpError> {
    if value < 1 << 6 {
        buf.push(value as u8);
    } else if value < 1 << 14 {
        buf.extend_from_slice(&((value as u16) | 0x4000).to_be_bytes());
    } else if value < 1 << 30 {
        buf.extend_from_slice(&((value as u32) | 0x8000_0000).to_be_bytes());
    } else if value <= MAX_VARINT {
        buf.extend_from_slice(&(value | 0xc000_0000_0000_0000).to_be_bytes());
    } else {
        return Err(BhttpError::VarintOverflow(value));
    }
    Ok(())
}

/// Cursor over an encoded message.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_varint(&mut self) -> Result<u64, BhttpError> {
        let first = *self
            .data
            .get(self.pos)
            .ok_or(BhttpError::Truncated { offset: self.pos })?;
        let len = 1usize << (first >> 6);
        let bytes = self.read_bytes(len)?;

        let mut value = u64::from(bytes[0] & 0x3f);
        for byte in &bytes[1..] {
            value = (value << 8) | u64::from(*byte);
        }
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BhttpError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(BhttpError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a varint length followed by that many bytes.
    pub fn read_length_prefixed(&mut self) -> Result<&'a [u8], BhttpError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| BhttpError::VarintOverflow(len))?;
        self.read_bytes(len)
    }
}

/// Append a varint length followed by the bytes themselves.
pub fn write_length_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), BhttpError> {
    write_varint(buf, bytes.len() as u64)?;
    buf.extend_from_slice(bytes);
    Ok(())
}
