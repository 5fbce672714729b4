//! Bitmap genérico

use alloc::vec;
use alloc::vec::Vec;

/// Bitmap dono do próprio armazenamento
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Cria bitmap com `bits` bits zerados
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
            len: bits,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Define um bit
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Limpa um bit
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index / 64] &= !(1 << (index % 64));
    }

    /// Testa um bit
    pub fn test(&self, index: usize) -> bool {
        index < self.len && (self.words[index / 64] & (1 << (index % 64))) != 0
    }

    /// Encontra primeiro bit livre (0) a partir de `hint`, com wrap-around
    pub fn find_first_zero_from(&self, hint: usize) -> Option<usize> {
        let start = if hint < self.len { hint } else { 0 };
        self.scan_zero(start, self.len).or_else(|| self.scan_zero(0, start))
    }

    /// Encontra primeiro bit livre (0)
    pub fn find_first_zero(&self) -> Option<usize> {
        self.scan_zero(0, self.len)
    }

    fn scan_zero(&self, from: usize, to: usize) -> Option<usize> {
        let mut index = from;
        while index < to {
            let word = self.words[index / 64] | ((1u64 << (index % 64)) - 1);
            if word != u64::MAX {
                let candidate = (index / 64) * 64 + word.trailing_ones() as usize;
                return (candidate < to).then_some(candidate);
            }
            index = (index / 64 + 1) * 64;
        }
        None
    }

    /// Número de bits em 1
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmap;

    #[test]
    fn finds_zero_after_hint_and_wraps() {
        let mut map = Bitmap::new(130);
        for i in 0..130 {
            map.set(i);
        }
        map.clear(3);
        map.clear(129);
        assert_eq!(map.find_first_zero_from(64), Some(129));
        map.set(129);
        assert_eq!(map.find_first_zero_from(64), Some(3));
        map.set(3);
        assert_eq!(map.find_first_zero(), None);
        assert_eq!(map.count_ones(), 130);
    }
}
