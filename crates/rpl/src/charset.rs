// Byte-level character sets for RPL
// Handles [abc], [a-z], [^...], [:name:] and unions like [[:digit:][a-f]]

use std::fmt;

/// Named POSIX-style classes accepted inside `[: :]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedClass {
    Alpha,
    Digit,
    Alnum,
    Space,
    Upper,
    Lower,
    Punct,
    Xdigit,
    Print,
    Graph,
    Cntrl,
}

impl NamedClass {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "alpha" => NamedClass::Alpha,
            "digit" => NamedClass::Digit,
            "alnum" => NamedClass::Alnum,
            "space" => NamedClass::Space,
            "upper" => NamedClass::Upper,
            "lower" => NamedClass::Lower,
            "punct" => NamedClass::Punct,
            "xdigit" => NamedClass::Xdigit,
            "print" => NamedClass::Print,
            "graph" => NamedClass::Graph,
            "cntrl" => NamedClass::Cntrl,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn matches(self, b: u8) -> bool {
        match self {
            NamedClass::Alpha => b.is_ascii_alphabetic(),
            NamedClass::Digit => b.is_ascii_digit(),
            NamedClass::Alnum => b.is_ascii_alphanumeric(),
            NamedClass::Space => b.is_ascii_whitespace() || b == 0x0b,
            NamedClass::Upper => b.is_ascii_uppercase(),
            NamedClass::Lower => b.is_ascii_lowercase(),
            NamedClass::Punct => b.is_ascii_punctuation(),
            NamedClass::Xdigit => b.is_ascii_hexdigit(),
            NamedClass::Print => b.is_ascii_graphic() || b == b' ',
            NamedClass::Graph => b.is_ascii_graphic(),
            NamedClass::Cntrl => b.is_ascii_control(),
        }
    }
}

/// A set of bytes stored as a 256-bit bitmap.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CharSet {
    bits: [u64; 4],
}

impl CharSet {
    pub const fn empty() -> Self {
        CharSet { bits: [0; 4] }
    }

    pub fn from_class(class: NamedClass) -> Self {
        let mut set = CharSet::empty();
        for b in 0..=255u8 {
            if class.matches(b) {
                set.insert(b);
            }
        }
        set
    }

    pub fn from_range(lo: u8, hi: u8) -> Self {
        let mut set = CharSet::empty();
        for b in lo..=hi {
            set.insert(b);
        }
        set
    }

    #[inline(always)]
    pub fn insert(&mut self, b: u8) {
        self.bits[(b >> 6) as usize] |= 1u64 << (b & 63);
    }

    #[inline(always)]
    pub fn contains(&self, b: u8) -> bool {
        self.bits[(b >> 6) as usize] & (1u64 << (b & 63)) != 0
    }

    pub fn union(mut self, other: &CharSet) -> Self {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= *b;
        }
        self
    }

    pub fn complement(mut self) -> Self {
        for word in self.bits.iter_mut() {
            *word = !*word;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl fmt::Debug for CharSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Render as a bracket expression of printable ranges
        write!(f, "[")?;
        let mut b: u16 = 0;
        while b < 256 {
            if !self.contains(b as u8) {
                b += 1;
                continue;
            }
            let start = b;
            while b + 1 < 256 && self.contains((b + 1) as u8) {
                b += 1;
            }
            let show = |x: u16| {
                let c = x as u8;
                if c.is_ascii_graphic() {
                    (c as char).to_string()
                } else {
                    format!("\\x{:02x}", c)
                }
            };
            if start == b {
                write!(f, "{}", show(start))?;
            } else {
                write!(f, "{}-{}", show(start), show(b))?;
            }
            b += 1;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_and_complement() {
        let digits = CharSet::from_range(b'0', b'9');
        assert!(digits.contains(b'5'));
        assert!(!digits.contains(b'a'));
        assert_eq!(digits.len(), 10);

        let not_digits = digits.complement();
        assert!(!not_digits.contains(b'5'));
        assert!(not_digits.contains(b'a'));
        assert_eq!(not_digits.len(), 246);
    }

    #[test]
    fn test_named_union() {
        let hex = CharSet::from_class(NamedClass::Digit).union(&CharSet::from_range(b'a', b'f'));
        assert!(hex.contains(b'c'));
        assert!(!hex.contains(b'g'));
        assert_eq!(format!("{:?}", hex), "[0-9a-f]");
    }
}
