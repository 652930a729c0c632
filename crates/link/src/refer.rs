/// A patch site outside any module that wants the value of a symbol,
/// shifted and masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferMethod {
    /// ROM offset of the site.
    pub from_addr: u32,
    pub or_mask: u32,
    pub num_bytes: u8,
    /// Right shift when positive, left shift when negative.
    pub shr_by: i8,
}

impl ReferMethod {
    pub fn new(from_addr: u32, or_mask: u32, num_bytes: u8, shr_by: i8) -> Self {
        Self {
            from_addr,
            or_mask,
            num_bytes,
            shr_by,
        }
    }

    /// Plain 16-bit pointer to the symbol.
    pub fn offset_pointer(from_addr: u32) -> Self {
        Self::new(from_addr, 0, 2, 0)
    }

    pub fn evaluate(&self, target: u32) -> u32 {
        let shift = u32::from(self.shr_by.unsigned_abs());
        let value = match self.shr_by {
            0 => target,
            n if n > 0 => target.checked_shr(shift).unwrap_or(0),
            _ => target.checked_shl(shift).unwrap_or(0),
        };
        value | self.or_mask
    }

    /// Little-endian bytes written at the site.
    pub fn encode(&self, target: u32) -> Vec<u8> {
        let value = u64::from(self.evaluate(target));
        (0..self.num_bytes)
            .map(|index| (value.checked_shr(8 * u32::from(index)).unwrap_or(0) & 0xFF) as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_is_plain_value() {
        let refer = ReferMethod::offset_pointer(0x10);
        assert_eq!(refer.evaluate(0x8123), 0x8123);
        assert_eq!(refer.encode(0x8123), vec![0x23, 0x81]);
    }

    #[test]
    fn shifts_then_masks() {
        assert_eq!(ReferMethod::new(0, 0x80, 1, 16).evaluate(0x03_8000), 0x83);
        assert_eq!(ReferMethod::new(0, 0, 2, -4).evaluate(0x12), 0x120);
    }
}
