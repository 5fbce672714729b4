/// Arquivo: core/boot/handoff.rs
///
/// Propósito: Leitura da estrutura Multiboot 1 entregue pelo bootloader.
/// Produz um [`BootInfo`] próprio (memory map, linha de comando, módulos)
/// para que nada depois do boot dependa da memória do bootloader.
///
/// Detalhes de Implementação:
/// - Os campos só valem se o bit correspondente de `flags` estiver ligado.
/// - Entradas do memory map avançam `size + 4` (o campo `size` não se conta).
/// - Regiões acima de 4 GiB são cortadas: sem PAE o núcleo não as endereça.
/// - Sem memory map, `mem_lower`/`mem_upper` viram duas regiões utilizáveis.

use crate::mm::addr::PhysRange;
use crate::mm::pmm::{MemoryRegion, MemoryRegionType};
use crate::sys::error::Errno;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Valor de EAX na entrada do kernel
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Bits de `flags` da estrutura de informação
pub const FLAG_MEM: u32 = 1 << 0;
pub const FLAG_CMDLINE: u32 = 1 << 2;
pub const FLAG_MODS: u32 = 1 << 3;
pub const FLAG_MMAP: u32 = 1 << 6;

// Offsets dentro da estrutura de informação
const OFF_FLAGS: u32 = 0;
const OFF_MEM_LOWER: u32 = 4;
const OFF_MEM_UPPER: u32 = 8;
const OFF_CMDLINE: u32 = 16;
const OFF_MODS_COUNT: u32 = 20;
const OFF_MODS_ADDR: u32 = 24;
const OFF_MMAP_LENGTH: u32 = 44;
const OFF_MMAP_ADDR: u32 = 48;

/// `base u64, length u64, type u32` depois do campo `size`
const MMAP_ENTRY_MIN: u32 = 20;
const MODULE_ENTRY_SIZE: u32 = 16;
const MAX_MODULES: u32 = 64;
const MAX_STRING: usize = 4096;

/// Fim do espaço endereçável em 32 bits.
const FOUR_GIB: u64 = 1 << 32;
/// Primeiro MiB: IVT, BDA, EBDA, ROMs e o trampolim das APs.
pub const LOW_MEMORY_END: u64 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// EAX não trazia a assinatura Multiboot
    BadMagic(u32),
    /// Nem memory map nem `mem_lower/upper`
    NoMemoryInfo,
    /// Entrada do memory map menor que o mínimo
    Malformed(u32),
    /// Endereço físico fora do que pode ser lido
    Unreadable(u32),
}

impl BootError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadMagic(_) => "Assinatura Multiboot inválida",
            Self::NoMemoryInfo => "Bootloader não informou a memória",
            Self::Malformed(_) => "Memory map malformado",
            Self::Unreadable(_) => "Estrutura de boot fora da memória legível",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<BootError> for Errno {
    fn from(_: BootError) -> Self {
        Errno::EINVAL
    }
}

/// Acesso à memória física onde o bootloader deixou as estruturas.
pub trait BootMemory {
    fn read(&self, phys: u32, buf: &mut [u8]) -> Result<(), BootError>;

    fn read_u32(&self, phys: u32) -> Result<u32, BootError> {
        let mut bytes = [0u8; 4];
        self.read(phys, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&self, phys: u32) -> Result<u64, BootError> {
        let mut bytes = [0u8; 8];
        self.read(phys, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// String C terminada em zero.
    fn read_cstr(&self, phys: u32) -> Result<String, BootError> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..MAX_STRING as u32 {
            self.read(phys.wrapping_add(i), &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Memória física vista pela janela linear do kernel (lowmem em
/// `KERNEL_BASE`), já montada pelo `_start`.
#[cfg(target_os = "none")]
pub struct LinearBootMemory;

#[cfg(target_os = "none")]
impl BootMemory for LinearBootMemory {
    fn read(&self, phys: u32, buf: &mut [u8]) -> Result<(), BootError> {
        let end = phys as u64 + buf.len() as u64;
        if end > crate::mm::config::ZONE_NORMAL_END {
            return Err(BootError::Unreadable(phys));
        }
        let virt = crate::mm::config::KERNEL_BASE as usize + phys as usize;
        // SAFETY: a faixa está dentro da lowmem, mapeada em KERNEL_BASE pelo
        // diretório de boot; o bootloader garante as estruturas em RAM.
        unsafe {
            core::ptr::copy_nonoverlapping(virt as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootModule {
    pub range: PhysRange,
    pub cmdline: String,
}

/// O que o núcleo guarda do handoff.
#[derive(Debug, Clone, Default)]
pub struct BootInfo {
    pub mem_lower_kib: u32,
    pub mem_upper_kib: u32,
    pub regions: Vec<MemoryRegion>,
    pub cmdline: String,
    pub modules: Vec<BootModule>,
}

impl BootInfo {
    /// Lê a estrutura em `info_addr`, validando a assinatura de EAX.
    pub fn parse(magic: u32, info_addr: u32, mem: &dyn BootMemory) -> Result<Self, BootError> {
        if magic != MULTIBOOT_BOOTLOADER_MAGIC {
            crate::kerror!("(Boot) Assinatura Multiboot inválida: ", magic);
            return Err(BootError::BadMagic(magic));
        }
        let at = |offset: u32| info_addr.wrapping_add(offset);
        let flags = mem.read_u32(at(OFF_FLAGS))?;
        crate::kdebug!("(Boot) flags=", flags);

        let mut info = Self::default();
        if flags & FLAG_MEM != 0 {
            info.mem_lower_kib = mem.read_u32(at(OFF_MEM_LOWER))?;
            info.mem_upper_kib = mem.read_u32(at(OFF_MEM_UPPER))?;
        }

        if flags & FLAG_MMAP != 0 {
            let length = mem.read_u32(at(OFF_MMAP_LENGTH))?;
            let addr = mem.read_u32(at(OFF_MMAP_ADDR))?;
            info.regions = parse_mmap(mem, addr, length)?;
        } else if flags & FLAG_MEM != 0 {
            info.regions = Vec::from([
                MemoryRegion::new(0, info.mem_lower_kib as u64 * 1024, MemoryRegionType::Usable),
                MemoryRegion::new(
                    LOW_MEMORY_END,
                    info.mem_upper_kib as u64 * 1024,
                    MemoryRegionType::Usable,
                ),
            ]);
        } else {
            return Err(BootError::NoMemoryInfo);
        }

        if flags & FLAG_CMDLINE != 0 {
            let addr = mem.read_u32(at(OFF_CMDLINE))?;
            info.cmdline = mem.read_cstr(addr)?;
        }

        if flags & FLAG_MODS != 0 {
            let count = mem.read_u32(at(OFF_MODS_COUNT))?.min(MAX_MODULES);
            let addr = mem.read_u32(at(OFF_MODS_ADDR))?;
            for i in 0..count {
                let entry = addr.wrapping_add(i * MODULE_ENTRY_SIZE);
                let start = mem.read_u32(entry)?;
                let end = mem.read_u32(entry + 4)?;
                let string = mem.read_u32(entry + 8)?;
                let cmdline = if string != 0 {
                    mem.read_cstr(string)?
                } else {
                    String::new()
                };
                info.modules.push(BootModule {
                    range: PhysRange::from_len(start as u64, end.saturating_sub(start) as u64),
                    cmdline,
                });
            }
        }

        crate::kinfo!("(Boot) Regiões no memory map: ", info.regions.len());
        crate::kinfo!("(Boot) Módulos: ", info.modules.len());
        Ok(info)
    }

    /// Faixas que o PMM não pode entregar: primeiro MiB e módulos.
    pub fn reservations(&self) -> Vec<PhysRange> {
        let mut ranges = Vec::with_capacity(self.modules.len() + 1);
        ranges.push(PhysRange::from_len(0, LOW_MEMORY_END));
        ranges.extend(self.modules.iter().map(|m| m.range));
        ranges
    }

    /// Bytes utilizáveis informados pelo memory map.
    pub fn usable_bytes(&self) -> u64 {
        self.regions
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| r.range.end.as_u64() - r.range.start.as_u64())
            .sum()
    }
}

/// Percorre o memory map. Cada entrada começa com `size`, que não inclui a
/// si mesmo.
fn parse_mmap(mem: &dyn BootMemory, addr: u32, length: u32) -> Result<Vec<MemoryRegion>, BootError> {
    let mut regions = Vec::new();
    let end = addr as u64 + length as u64;
    let mut cursor = addr as u64;

    while cursor + 4 <= end {
        let entry = cursor as u32;
        let size = mem.read_u32(entry)?;
        if size < MMAP_ENTRY_MIN {
            crate::kerror!("(Boot) Entrada de memory map curta em ", entry);
            return Err(BootError::Malformed(entry));
        }
        let base = mem.read_u64(entry + 4)?;
        let len = mem.read_u64(entry + 12)?;
        let kind = mem.read_u32(entry + 20)?;
        cursor += size as u64 + 4;

        if len == 0 || base >= FOUR_GIB {
            continue;
        }
        let len = len.min(FOUR_GIB - base);
        regions.push(MemoryRegion::new(base, len, MemoryRegionType::from_multiboot(kind)));
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    /// Memória física falsa: um bloco de bytes a partir de `base`.
    struct Image {
        base: u32,
        bytes: Vec<u8>,
    }

    impl Image {
        fn new(base: u32, size: usize) -> Self {
            Self {
                base,
                bytes: vec![0; size],
            }
        }

        fn put(&mut self, phys: u32, data: &[u8]) {
            let at = (phys - self.base) as usize;
            self.bytes[at..at + data.len()].copy_from_slice(data);
        }

        fn put_u32(&mut self, phys: u32, value: u32) {
            self.put(phys, &value.to_le_bytes());
        }

        fn put_entry(&mut self, phys: u32, size: u32, base: u64, len: u64, kind: u32) -> u32 {
            self.put_u32(phys, size);
            self.put(phys + 4, &base.to_le_bytes());
            self.put(phys + 12, &len.to_le_bytes());
            self.put_u32(phys + 20, kind);
            phys + size + 4
        }
    }

    impl BootMemory for Image {
        fn read(&self, phys: u32, buf: &mut [u8]) -> Result<(), BootError> {
            let at = phys.checked_sub(self.base).ok_or(BootError::Unreadable(phys))? as usize;
            let src = self
                .bytes
                .get(at..at + buf.len())
                .ok_or(BootError::Unreadable(phys))?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    const INFO: u32 = 0x9000;
    const MMAP: u32 = 0x9100;
    const MODS: u32 = 0x9400;
    const STRINGS: u32 = 0x9800;

    fn image_with_map() -> Image {
        let mut img = Image::new(0x9000, 0x1000);
        img.put_u32(INFO + OFF_FLAGS, FLAG_MEM | FLAG_MMAP | FLAG_CMDLINE | FLAG_MODS);
        img.put_u32(INFO + OFF_MEM_LOWER, 639);
        img.put_u32(INFO + OFF_MEM_UPPER, 130_048);

        let mut next = img.put_entry(MMAP, 20, 0, 0x9F000, 1);
        next = img.put_entry(next, 20, 0x9F000, 0x1000, 2);
        // Entrada com `size` maior: o walker deve pular o excesso
        next = img.put_entry(next, 24, 0x10_0000, 0x7F0_0000, 1);
        next = img.put_entry(next, 20, 0xFFFC_0000, 0x8_0000, 2);
        next = img.put_entry(next, 20, 0x1_0000_0000, 0x1000_0000, 1);
        img.put_u32(INFO + OFF_MMAP_ADDR, MMAP);
        img.put_u32(INFO + OFF_MMAP_LENGTH, next - MMAP);

        img.put(STRINGS, b"nr_cpus=2 swap=ram:64\0");
        img.put(STRINGS + 0x40, b"initrd\0");
        img.put_u32(INFO + OFF_CMDLINE, STRINGS);

        img.put_u32(MODS, 0x20_0000);
        img.put_u32(MODS + 4, 0x20_3000);
        img.put_u32(MODS + 8, STRINGS + 0x40);
        img.put_u32(INFO + OFF_MODS_COUNT, 1);
        img.put_u32(INFO + OFF_MODS_ADDR, MODS);
        img
    }

    #[test]
    fn parses_map_cmdline_and_modules() {
        let img = image_with_map();
        let info = BootInfo::parse(MULTIBOOT_BOOTLOADER_MAGIC, INFO, &img).unwrap();

        assert_eq!((info.mem_lower_kib, info.mem_upper_kib), (639, 130_048));
        assert_eq!(info.cmdline, "nr_cpus=2 swap=ram:64");
        assert_eq!(info.regions.len(), 4);
        assert_eq!(info.regions[0], MemoryRegion::new(0, 0x9F000, MemoryRegionType::Usable));
        assert_eq!(info.regions[1].kind, MemoryRegionType::Reserved);
        assert_eq!(info.regions[2], MemoryRegion::new(0x10_0000, 0x7F0_0000, MemoryRegionType::Usable));
        // Cortada em 4 GiB; a de cima some
        assert_eq!(info.regions[3].range.end.as_u64(), FOUR_GIB);
        assert_eq!(info.usable_bytes(), 0x9F000 + 0x7F0_0000);

        assert_eq!(info.modules.len(), 1);
        assert_eq!(info.modules[0].cmdline, "initrd");
        assert_eq!(info.modules[0].range, PhysRange::from_len(0x20_0000, 0x3000));
        let reserved = info.reservations();
        assert_eq!(reserved[0], PhysRange::from_len(0, LOW_MEMORY_END));
        assert_eq!(reserved[1], info.modules[0].range);
    }

    #[test]
    fn rejects_wrong_magic() {
        let img = image_with_map();
        assert_eq!(
            BootInfo::parse(0x36D7_6289, INFO, &img).unwrap_err(),
            BootError::BadMagic(0x36D7_6289)
        );
    }

    #[test]
    fn falls_back_to_mem_lower_upper() {
        let mut img = Image::new(0x9000, 0x100);
        img.put_u32(INFO + OFF_FLAGS, FLAG_MEM);
        img.put_u32(INFO + OFF_MEM_LOWER, 640);
        img.put_u32(INFO + OFF_MEM_UPPER, 31 * 1024);
        let info = BootInfo::parse(MULTIBOOT_BOOTLOADER_MAGIC, INFO, &img).unwrap();
        assert_eq!(info.regions.len(), 2);
        assert_eq!(info.regions[1], MemoryRegion::new(LOW_MEMORY_END, 31 << 20, MemoryRegionType::Usable));
        assert!(info.cmdline.is_empty() && info.modules.is_empty());

        img.put_u32(INFO + OFF_FLAGS, 0);
        assert_eq!(
            BootInfo::parse(MULTIBOOT_BOOTLOADER_MAGIC, INFO, &img).unwrap_err(),
            BootError::NoMemoryInfo
        );
    }

    #[test]
    fn short_entry_is_malformed() {
        let mut img = image_with_map();
        img.put_u32(MMAP, 8);
        assert_eq!(
            BootInfo::parse(MULTIBOOT_BOOTLOADER_MAGIC, INFO, &img).unwrap_err(),
            BootError::Malformed(MMAP)
        );
    }
}
