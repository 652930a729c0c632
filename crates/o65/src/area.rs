use std::collections::BTreeMap;

/// Sparse byte store keyed by address.
///
/// Adjacent writes are coalesced so that each entry is a maximal run of
/// written bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataArea {
    blobs: BTreeMap<u32, Vec<u8>>,
}

impl DataArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.blobs.clear();
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        let previous = self
            .blobs
            .range(..=address)
            .next_back()
            .map(|(start, blob)| (*start, start + blob.len() as u32));
        let tail = address.checked_add(1).and_then(|next| self.blobs.remove(&next));

        if let Some((start, end)) = previous
            && address <= end
            && let Some(blob) = self.blobs.get_mut(&start)
        {
            if address < end {
                blob[(address - start) as usize] = value;
                if let Some(tail) = tail {
                    self.blobs.insert(address + 1, tail);
                }
            } else {
                blob.push(value);
                blob.extend_from_slice(&tail.unwrap_or_default());
            }
            return;
        }

        let mut blob = vec![value];
        blob.extend_from_slice(&tail.unwrap_or_default());
        self.blobs.insert(address, blob);
    }

    pub fn write_lump(&mut self, address: u32, bytes: &[u8]) {
        for (index, byte) in bytes.iter().enumerate() {
            self.write_byte(address.wrapping_add(index as u32), *byte);
        }
    }

    pub fn byte(&self, address: u32) -> Option<u8> {
        let (&start, blob) = self.blobs.range(..=address).next_back()?;
        blob.get((address - start) as usize).copied()
    }

    /// Lowest written address.
    pub fn base(&self) -> Option<u32> {
        self.blobs.keys().next().copied()
    }

    /// One past the highest written address.
    pub fn top(&self) -> Option<u32> {
        self.blobs
            .iter()
            .next_back()
            .map(|(start, blob)| start + blob.len() as u32)
    }

    pub fn is_contiguous(&self) -> bool {
        self.blobs.len() <= 1
    }

    /// Unwritten ranges between `base` and `top`.
    pub fn holes(&self) -> Vec<(u32, u32)> {
        self.blobs
            .iter()
            .zip(self.blobs.iter().skip(1))
            .map(|((start, blob), (next, _))| (start + blob.len() as u32, *next))
            .collect()
    }

    /// Everything from `base` to `top`, gaps filled with zero.
    pub fn content(&self) -> Vec<u8> {
        match (self.base(), self.top()) {
            (Some(base), Some(top)) => self.content_range(base, top),
            _ => Vec::new(),
        }
    }

    pub fn content_range(&self, begin: u32, end: u32) -> Vec<u8> {
        let mut out = vec![0; end.saturating_sub(begin) as usize];
        for (start, blob) in self.blobs.range(..end) {
            for (index, byte) in blob.iter().enumerate() {
                let address = start + index as u32;
                if address >= begin && address < end {
                    out[(address - begin) as usize] = *byte;
                }
            }
        }
        out
    }

    pub fn blobs(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.blobs
            .iter()
            .map(|(start, blob)| (*start, blob.as_slice()))
    }
}
