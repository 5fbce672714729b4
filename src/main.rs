//! Nucleo: Binário da Imagem (Multiboot, i686).
//!
//! Responsabilidade:
//! 1. Cabeçalho Multiboot (o GRUB/QEMU `-kernel` carrega a imagem em 1 MiB).
//! 2. `_start`: liga a paginação com o diretório de boot (identidade nos
//!    primeiros 4 MiB, lowmem em `0xC0000000`, janela do APIC).
//! 3. **ZERA BSS** (o heap e as tabelas estáticas dependem disso).
//! 4. Troca para a pilha de boot e salta para `core::entry::kernel_main`.
//!
//! Tudo depois do salto é código da biblioteca `nucleo`.

#![no_std]
#![no_main]

// Importar a biblioteca do kernel.
use nucleo::core as kernel_core;

/// Pilha de boot (64 KiB). Vira a pilha da tarefa idle do BSP.
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(C, align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[no_mangle]
static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

// Entradas de 4 MiB (PSE): Present | Writable | PageSize
const PDE_LARGE: u32 = 0x83;
// + Cache Disable, para a janela de MMIO
const PDE_LARGE_MMIO: u32 = 0x93;

core::arch::global_asm!(
    // ============================================================
    // Cabeçalho Multiboot (alinhado, nos primeiros 8 KiB da imagem)
    // ============================================================
    ".section .multiboot, \"a\"",
    ".align 4",
    ".long 0x1BADB002",
    // flags: módulos alinhados a página | memory map
    ".long 0x00000003",
    ".long -(0x1BADB002 + 0x00000003)",
    "",
    // ============================================================
    // Diretório de boot
    // ============================================================
    // 0             identidade 0..4 MiB (desfeita depois do boot das APs)
    // 768..991      0xC0000000.. -> 0..896 MiB (janela linear)
    // 0x3FB         0xFEC00000..0xFF000000 identidade (IOAPIC e LAPIC)
    ".section .data.boot, \"aw\"",
    ".align 4096",
    ".global nucleo_boot_pd",
    "nucleo_boot_pd:",
    ".set pde, 0",
    ".rept 1024",
    ".if pde == 0",
    ".long {large}",
    ".elseif (pde >= 768) && (pde < 992)",
    ".long ((pde - 768) << 22) | {large}",
    ".elseif pde == 0x3FB",
    ".long 0xFEC00000 | {mmio}",
    ".else",
    ".long 0",
    ".endif",
    ".set pde, pde + 1",
    ".endr",
    "",
    // ============================================================
    // _start: EAX = magic, EBX = endereço físico da info Multiboot
    // ============================================================
    ".section .text.boot, \"ax\"",
    ".global _start",
    "_start:",
    "cli",
    "mov ebp, eax",
    // 1. Paginação com o diretório de boot (endereço físico)
    "mov ecx, offset nucleo_boot_pd - 0xC0000000",
    "mov cr3, ecx",
    "mov ecx, cr4",
    "or ecx, 0x10",
    "mov cr4, ecx",
    "mov ecx, cr0",
    "or ecx, 0x80010000",
    "mov cr0, ecx",
    // 2. Salto absoluto para o higher-half
    "lea ecx, [nucleo_higher_half]",
    "jmp ecx",
    ".section .text",
    "nucleo_higher_half:",
    // 3. Zerar BSS
    "cld",
    "xor eax, eax",
    "mov edi, offset __bss_start",
    "mov ecx, offset __bss_end",
    "sub ecx, edi",
    "shr ecx, 2",
    "rep stosd",
    // 4. Pilha de boot
    "mov esp, offset {stack} + {stack_size}",
    "push ebx",
    "push ebp",
    "xor ebp, ebp",
    "call {entry}",
    "3:",
    "hlt",
    "jmp 3b",
    large = const PDE_LARGE,
    mmio = const PDE_LARGE_MMIO,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    entry = sym kernel_entry,
);

/// Ponte cdecl entre o `_start` e a biblioteca.
extern "C" fn kernel_entry(magic: u32, info: u32) -> ! {
    kernel_core::entry::kernel_main(magic, info)
}
