//! Swap em RAM: referência de backend para testes e `swap=ram:N`.

use super::{SwapBackend, SwapEntry, SwapError};
use crate::klib::Bitmap;
use crate::mm::config::PAGE_SIZE;
use crate::sync::{LockRank, Spinlock};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

struct Slots {
    used: Bitmap,
    data: Vec<Option<Box<[u8]>>>,
    hint: usize,
}

pub struct MemorySwap {
    slots: Spinlock<Slots>,
    fail_io: AtomicBool,
}

impl MemorySwap {
    pub fn new(pages: usize) -> Self {
        let mut data = Vec::with_capacity(pages);
        data.resize_with(pages, || None);
        Self {
            slots: Spinlock::new(
                LockRank::SwapDevice,
                Slots {
                    used: Bitmap::new(pages),
                    data,
                    hint: 0,
                },
            ),
            fail_io: AtomicBool::new(false),
        }
    }

    /// Faz toda leitura/escrita seguinte falhar com `Io` (injeção de falha).
    pub fn set_fail_io(&self, fail: bool) {
        self.fail_io.store(fail, Ordering::Release);
    }

    fn check_io(&self) -> Result<(), SwapError> {
        if self.fail_io.load(Ordering::Acquire) {
            return Err(SwapError::Io);
        }
        Ok(())
    }

    fn index(entry: SwapEntry) -> usize {
        entry.id() as usize - 1
    }
}

impl SwapBackend for MemorySwap {
    fn alloc(&self) -> Result<SwapEntry, SwapError> {
        let mut slots = self.slots.lock_irqsave();
        let idx = slots
            .used
            .find_first_zero_from(slots.hint)
            .or_else(|| slots.used.find_first_zero())
            .ok_or(SwapError::NoSpace)?;
        let entry = SwapEntry::new(idx as u32 + 1).ok_or(SwapError::NoSpace)?;
        slots.used.set(idx);
        slots.hint = idx + 1;
        Ok(entry)
    }

    fn free(&self, entry: SwapEntry) {
        let idx = Self::index(entry);
        let stale = {
            let mut slots = self.slots.lock_irqsave();
            if idx >= slots.used.len() || !slots.used.test(idx) {
                None
            } else {
                slots.used.clear(idx);
                slots.hint = slots.hint.min(idx);
                Some(slots.data[idx].take())
            }
        };
        match stale {
            // Buffer liberado fora do lock
            Some(buf) => drop(buf),
            None => crate::kwarn!("(Swap) free de entrada não alocada: ", entry.id() as u64),
        }
    }

    fn write(&self, entry: SwapEntry, page: &[u8]) -> Result<(), SwapError> {
        self.check_io()?;
        if page.len() != PAGE_SIZE {
            return Err(SwapError::Io);
        }
        let buf: Box<[u8]> = page.into();
        let idx = Self::index(entry);
        let old = {
            let mut slots = self.slots.lock_irqsave();
            if idx >= slots.used.len() || !slots.used.test(idx) {
                return Err(SwapError::InvalidEntry);
            }
            slots.data[idx].replace(buf)
        };
        drop(old);
        Ok(())
    }

    fn read(&self, entry: SwapEntry, page: &mut [u8]) -> Result<(), SwapError> {
        self.check_io()?;
        let idx = Self::index(entry);
        let slots = self.slots.lock_irqsave();
        if idx >= slots.used.len() || !slots.used.test(idx) {
            return Err(SwapError::InvalidEntry);
        }
        match &slots.data[idx] {
            Some(buf) if buf.len() == page.len() => page.copy_from_slice(buf),
            Some(_) => return Err(SwapError::Io),
            // Slot alocado e nunca escrito lê como zeros
            None => page.fill(0),
        }
        Ok(())
    }

    fn is_allocated(&self, entry: SwapEntry) -> bool {
        let idx = Self::index(entry);
        let slots = self.slots.lock_irqsave();
        idx < slots.used.len() && slots.used.test(idx)
    }

    fn used(&self) -> usize {
        self.slots.lock_irqsave().used.count_ones()
    }

    fn capacity(&self) -> usize {
        self.slots.lock_irqsave().used.len()
    }
}
