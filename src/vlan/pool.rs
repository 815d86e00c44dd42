/// Lowest local vlan id handed out to unshared (tenant) networks
pub const UNSHARED_VLAN_MIN: u16 = 2;
/// Highest local vlan id handed out to unshared (tenant) networks
pub const UNSHARED_VLAN_MAX: u16 = 4000;
/// Lowest local vlan id handed out to shared networks
pub const SHARED_VLAN_MIN: u16 = 4002;
/// Highest local vlan id handed out to shared networks
pub const SHARED_VLAN_MAX: u16 = 4094;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-range bitmap allocator over the closed range `[min, max]`.
///
/// `allocate` scans for the lowest clear bit and sets it before returning,
/// so a returned id is always marked in use. `release` clears a single bit.
#[derive(Debug, Clone)]
pub struct VlanPool {
    min: u16,
    max: u16,
    words: Vec<u64>,
    in_use: usize,
}

impl VlanPool {
    pub fn new(min: u16, max: u16) -> Self {
        assert!(min <= max, "empty vlan range {}..={}", min, max);
        let len = usize::from(max - min) + 1;
        Self {
            min,
            max,
            words: vec![0; len.div_ceil(WORD_BITS)],
            in_use: 0,
        }
    }

    /// Pool for shared networks, `[4002, 4094]`
    pub fn shared() -> Self {
        Self::new(SHARED_VLAN_MIN, SHARED_VLAN_MAX)
    }

    /// Pool for unshared networks, `[2, 4000]`
    pub fn unshared() -> Self {
        Self::new(UNSHARED_VLAN_MIN, UNSHARED_VLAN_MAX)
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min, self.max)
    }

    pub fn contains(&self, id: u16) -> bool {
        id >= self.min && id <= self.max
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn is_exhausted(&self) -> bool {
        self.in_use == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    fn slot(&self, id: u16) -> (usize, u64) {
        let offset = usize::from(id - self.min);
        (offset / WORD_BITS, 1u64 << (offset % WORD_BITS))
    }

    pub fn is_allocated(&self, id: u16) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (word, mask) = self.slot(id);
        self.words[word] & mask != 0
    }

    /// Take the lowest free id, or `None` when the pool is exhausted
    pub fn allocate(&mut self) -> Option<u16> {
        let capacity = self.capacity();
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let offset = w * WORD_BITS + bit;
            // Padding bits past `max` in the last word are never valid.
            if offset >= capacity {
                return None;
            }
            *word |= 1u64 << bit;
            self.in_use += 1;
            return Some(self.min + offset as u16);
        }
        None
    }

    /// Mark an id as used. Returns false when the id is out of range or
    /// already marked.
    pub fn mark(&mut self, id: u16) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (word, mask) = self.slot(id);
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.in_use += 1;
        true
    }

    /// Clear an id. Returns false when the id is out of range or was not
    /// marked.
    pub fn release(&mut self, id: u16) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (word, mask) = self.slot(id);
        if self.words[word] & mask == 0 {
            return false;
        }
        self.words[word] &= !mask;
        self.in_use -= 1;
        true
    }
}
