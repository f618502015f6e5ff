//! Big-endian field packing for storage words.
//!
//! Readers consume from the front of the buffer and yield zero once it runs dry,
//! so a short word decodes its missing tail as zeroes.

fn take<const N: usize>(data: &mut Vec<u8>) -> [u8; N] {
    let mut out = [0u8; N];
    let len = N.min(data.len());
    out[..len].copy_from_slice(&data[..len]);
    data.drain(..len);
    out
}

pub(crate) fn take_u8(data: &mut Vec<u8>) -> u8 {
    take::<1>(data)[0]
}

pub(crate) fn take_u16(data: &mut Vec<u8>) -> u16 {
    u16::from_be_bytes(take(data))
}

pub(crate) fn take_u24(data: &mut Vec<u8>) -> u32 {
    let [a, b, c] = take::<3>(data);
    u32::from_be_bytes([0, a, b, c])
}

pub(crate) fn take_u32(data: &mut Vec<u8>) -> u32 {
    u32::from_be_bytes(take(data))
}

pub(crate) fn take_u64(data: &mut Vec<u8>) -> u64 {
    u64::from_be_bytes(take(data))
}

/// Appends big-endian fields into a fixed 32 byte word.
#[derive(Debug, Default)]
pub(crate) struct WordWriter {
    data: [u8; 32],
    offset: usize,
}

impl WordWriter {
    fn put(&mut self, bytes: &[u8]) -> &mut Self {
        let end = (self.offset + bytes.len()).min(32);
        self.data[self.offset..end].copy_from_slice(&bytes[..end - self.offset]);
        self.offset = end;
        self
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.put(&[value])
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.put(&value.to_be_bytes())
    }

    /// Writes the low three bytes of `value`.
    pub(crate) fn u24(&mut self, value: u32) -> &mut Self {
        self.put(&value.min(0x00ff_ffff).to_be_bytes()[1..4])
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.put(&value.to_be_bytes())
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.put(&value.to_be_bytes())
    }

    pub(crate) fn finish(&self) -> [u8; 32] {
        self.data
    }
}
