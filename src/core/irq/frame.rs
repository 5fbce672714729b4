/// Arquivo: core/irq/frame.rs
///
/// Propósito: Registradores salvos na entrada de uma interrupção.
///
/// Layout (endereço crescente) = ordem inversa dos pushes do stub:
/// segmentos, `pusha`, vetor + código de erro, e o que a CPU empilha
/// (`eip, cs, eflags` e, vindo do ring 3, `esp/ss` do usuário).

/// Seletor de código de usuário (GDT 24 | RPL 3).
pub const USER_CS: u32 = 0x1B;
pub const USER_DS: u32 = 0x23;
pub const KERNEL_CS: u32 = 0x08;
pub const KERNEL_DS: u32 = 0x10;

/// EFLAGS.IF
pub const EFLAGS_IF: u32 = 1 << 9;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` do `pusha` (ignorado no `popa`)
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// Só válidos quando a interrupção veio do ring 3
    pub user_esp: u32,
    pub user_ss: u32,
}

impl InterruptFrame {
    /// Frame de uma interrupção vinda do kernel com IF ligado.
    pub const fn kernel(vector: u8) -> Self {
        Self {
            gs: KERNEL_DS,
            fs: KERNEL_DS,
            es: KERNEL_DS,
            ds: KERNEL_DS,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            vector: vector as u32,
            error: 0,
            eip: 0,
            cs: KERNEL_CS,
            eflags: EFLAGS_IF,
            user_esp: 0,
            user_ss: 0,
        }
    }

    /// Frame de uma interrupção vinda do ring 3.
    pub const fn user(vector: u8) -> Self {
        let mut frame = Self::kernel(vector);
        frame.gs = USER_DS;
        frame.fs = USER_DS;
        frame.es = USER_DS;
        frame.ds = USER_DS;
        frame.cs = USER_CS;
        frame.user_ss = USER_DS;
        frame
    }

    pub const fn with_error(mut self, error: u32) -> Self {
        self.error = error;
        self
    }

    #[inline]
    pub fn vector(&self) -> u8 {
        self.vector as u8
    }

    /// A interrupção interrompeu código de usuário?
    #[inline]
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    #[inline]
    pub fn interrupts_were_enabled(&self) -> bool {
        self.eflags & EFLAGS_IF != 0
    }

    // --- ABI de syscall: número em EAX, argumentos em EBX..EBP ---

    pub fn syscall_number(&self) -> u32 {
        self.eax
    }

    pub fn syscall_args(&self) -> [u32; 6] {
        [self.ebx, self.ecx, self.edx, self.esi, self.edi, self.ebp]
    }

    pub fn set_return(&mut self, value: u32) {
        self.eax = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn layout_matches_entry_stub() {
        assert_eq!(offset_of!(InterruptFrame, gs), 0);
        assert_eq!(offset_of!(InterruptFrame, edi), 16);
        assert_eq!(offset_of!(InterruptFrame, eax), 44);
        assert_eq!(offset_of!(InterruptFrame, vector), 48);
        assert_eq!(offset_of!(InterruptFrame, eip), 56);
        assert_eq!(size_of::<InterruptFrame>(), 19 * 4);
    }

    #[test]
    fn privilege_and_syscall_registers() {
        let mut frame = InterruptFrame::user(0x80);
        assert!(frame.from_user());
        assert!(!InterruptFrame::kernel(0x80).from_user());
        frame.eax = 20;
        frame.ebx = 1;
        frame.ebp = 6;
        assert_eq!(frame.syscall_number(), 20);
        assert_eq!(frame.syscall_args(), [1, 0, 0, 0, 0, 6]);
        frame.set_return((-38i32) as u32);
        assert_eq!(frame.eax as i32, -38);
    }
}
