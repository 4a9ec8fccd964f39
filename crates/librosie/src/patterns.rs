// Pattern handle table
// Slots are reused after a free; each reuse bumps the slot's generation so
// a stale handle no longer resolves.

const INDEX_BITS: u32 = 20;
const INDEX_MASK: i32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u16 = (1 << 11) - 1;

/// Largest number of live patterns one engine can hold.
pub const MAX_PATTERNS: usize = INDEX_MASK as usize;

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

#[derive(Debug)]
pub struct PatternTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> Default for PatternTable<T> {
    fn default() -> Self {
        PatternTable {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

fn encode(index: usize, generation: u16) -> i32 {
    ((generation as i32) << INDEX_BITS) | (index as i32 + 1)
}

fn decode(raw: i32) -> Option<(usize, u16)> {
    if raw <= 0 {
        return None;
    }
    let index = (raw & INDEX_MASK) as usize;
    if index == 0 {
        return None;
    }
    Some((index - 1, (raw >> INDEX_BITS) as u16))
}

impl<T> PatternTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning its handle (always positive), or `None`
    /// when the table is full.
    pub fn insert(&mut self, value: T) -> Option<i32> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.slots.len() >= MAX_PATTERNS {
                    return None;
                }
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.live += 1;
        Some(encode(index, slot.generation))
    }

    pub fn get(&self, raw: i32) -> Option<&T> {
        let (index, generation) = decode(raw)?;
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn remove(&mut self, raw: i32) -> Option<T> {
        let (index, generation) = decode(raw)?;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut table = PatternTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert!(a > 0 && b > 0 && a != b);
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.get(a), None);
        assert_eq!(table.remove(a), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut table = PatternTable::new();
        let old = table.insert(1).unwrap();
        table.remove(old);
        let new = table.insert(2).unwrap();
        assert_eq!(old & INDEX_MASK, new & INDEX_MASK);
        assert_ne!(old, new);
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&2));
    }

    #[test]
    fn test_bogus_handles() {
        let mut table = PatternTable::new();
        table.insert(()).unwrap();
        for raw in [0, -1, i32::MIN, 1 << INDEX_BITS, 77] {
            assert!(table.get(raw).is_none(), "{}", raw);
        }
    }

    #[test]
    fn test_generation_wraps_positive() {
        let mut table = PatternTable::new();
        for _ in 0..5000 {
            let h = table.insert(()).unwrap();
            assert!(h > 0);
            table.remove(h).unwrap();
        }
        assert!(table.is_empty());
    }
}
