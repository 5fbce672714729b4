//! Entry Point Lógico do Kernel.
//!
//! `kernel_main` é o primeiro código Rust executado depois do `_start`
//! (assembly da imagem), já em higher-half, com o diretório de boot em CR3
//! e a pilha de boot.
//!
//! # Ordem de inicialização
//! 1. **Saída e heap**: serial, depois o heap estático (`Vec`/`Arc`).
//! 2. **CPU**: GDT/TSS e IDT do BSP.
//! 3. **Handoff**: lê o Multiboot e a linha de comando.
//! 4. **Memória**: PMM sobre a lowmem, VMM com o diretório de boot como raiz
//!    do kernel, swap em RAM se pedido.
//! 5. **Núcleo**: SMP, relógio, scheduler, controlador de IRQ, tabela de
//!    syscalls; publica o `Kernel` para o stub de entrada.
//! 6. **Tick e APs**: PIT, INIT/SIPI das secundárias, desfaz a identidade.
//! 7. **Selftest** (opcional) e loop idle do BSP.
//!
//! Qualquer falha antes do loop idle é irrecuperável: vira `panic!`.

use crate::arch::x86::apic::{self, IoApic};
use crate::arch::x86::smpboot::SipiStarter;
use crate::arch::x86::{self, pit};
use crate::arch::{Cpu, CpuOps};
use crate::core::boot::handoff::LinearBootMemory;
use crate::core::boot::BootInfo;
use crate::core::config::{KernelConfig, SwapConfig, DEFAULT_TIMESLICE};
use crate::core::irq::{IrqChip, Pic8259};
use crate::core::kernel::{self, Kernel};
use crate::core::selftest;
use crate::core::smp::Smp;
use crate::core::time::Clock;
use crate::drivers::serial;
use crate::mm::config::{KERNEL_BASE, ZONE_NORMAL_END};
use crate::mm::linear::LinearMap;
use crate::mm::pmm::Reclaim;
use crate::mm::swap::MemorySwap;
use crate::mm::{heap, PhysAddr, PhysRange, Pmm, Vmm};
use crate::sched::{RoundRobin, Scheduler};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

extern "C" {
    // Definidos pelo linker script (endereços físicos da imagem)
    static __kernel_phys_start: u8;
    static __kernel_phys_end: u8;
}

/// CPUID.1:EDX bit 9, LAPIC presente
const CPUID_APIC: u32 = 1 << 9;

/// Função principal do Kernel. Não retorna.
///
/// `magic`/`info` são EAX/EBX entregues pelo bootloader Multiboot.
pub fn kernel_main(magic: u32, info: u32) -> ! {
    serial::init();
    heap::init();
    crate::kinfo!("nucleo: iniciando no BSP");

    // SAFETY: primeira e única inicialização do BSP, IF desligado
    unsafe { x86::init_cpu(0) };

    let boot = match BootInfo::parse(magic, info, &LinearBootMemory) {
        Ok(boot) => boot,
        Err(err) => panic!("(Boot) Handoff inválido: {}", err.as_str()),
    };
    let config = KernelConfig::parse(&boot.cmdline);
    crate::kinfo!("(Boot) CPUs pedidas=", config.nr_cpus, " hz=", config.hz);

    // O diretório de boot vira a raiz do kernel: as PDEs altas são copiadas
    // dele para cada address space novo.
    let boot_root = Cpu::read_cr3();
    // SAFETY: só os endereços dos símbolos são usados
    let image = unsafe {
        PhysRange::new(
            PhysAddr::new(&raw const __kernel_phys_start as u64),
            PhysAddr::new(&raw const __kernel_phys_end as u64),
        )
    };
    let mut reserved = boot.reservations();
    reserved.push(image);

    // SAFETY: o _start mapeia 0..ZONE_NORMAL_END em KERNEL_BASE
    let linear = unsafe { LinearMap::new(PhysAddr::new(0), PhysAddr::new(ZONE_NORMAL_END), KERNEL_BASE as usize) };
    let pmm = match Pmm::new(linear, &boot.regions, &reserved) {
        Ok(pmm) => Arc::new(pmm),
        Err(err) => panic!("(PMM) Sem memória utilizável: {:?}", err),
    };

    let has_apic = Cpu::cpuid(1).3 & CPUID_APIC != 0;
    if has_apic {
        // SAFETY: janela do LAPIC mapeada pelo diretório de boot
        unsafe { apic::init_bsp() };
    }
    let nr_cpus = if has_apic { config.nr_cpus } else { 1 };
    let smp = Arc::new(Smp::new(nr_cpus));
    smp.mark_boot_cpu_online(0);

    let vmm = Arc::new(Vmm::new(pmm.clone(), smp.clone(), Some(PhysAddr::new(boot_root as u64).pfn())));
    let reclaim: Weak<dyn Reclaim> = Arc::downgrade(&vmm) as Weak<dyn Reclaim>;
    pmm.set_reclaim(reclaim);
    if let SwapConfig::Ram(slots) = config.swap {
        vmm.set_swap(Arc::new(MemorySwap::new(slots)));
        crate::kinfo!("(Boot) Swap em RAM, slots=", slots);
    }

    let clock = Arc::new(Clock::new(config.hz));
    let sched = Arc::new(Scheduler::new(
        smp.clone(),
        clock,
        Box::new(RoundRobin::new(nr_cpus, DEFAULT_TIMESLICE)),
    ));
    sched.init_cpu();

    // O 8259 é sempre remapeado (fora dos vetores de exceção); com IOAPIC
    // ele fica todo mascarado.
    let pic = Pic8259::new();
    pic.init();
    let chip: Arc<dyn IrqChip> = if has_apic {
        pic.disable();
        // SAFETY: janela do IOAPIC mapeada pelo diretório de boot
        Arc::new(unsafe { IoApic::init() })
    } else {
        Arc::new(pic)
    };

    let kernel = match Kernel::new(config, sched.clone(), vmm, chip) {
        Ok(kernel) => kernel::install(kernel),
        Err(err) => panic!("(Boot) Falha ao montar o núcleo: {:?}", err),
    };
    if let Err(err) = kernel.install_timer(0) {
        panic!("(Boot) Timer sem linha: {}", err);
    }
    pit::init(config.hz);

    if has_apic {
        start_secondaries(kernel, boot_root);
    }
    drop_identity_map(kernel, boot_root);

    if kernel.config.selftest {
        let report = selftest::run(kernel);
        crate::kinfo!("(Selftest) passed=", report.passed, " failed=", report.failed);
    }

    let (used, free) = heap::usage();
    crate::kinfo!("(MM) Heap em uso=", used, " livre=", free);
    crate::kok!("nucleo: BSP entrando no loop idle");
    Cpu::irq_enable();
    sched.idle_loop()
}

/// Sobe as APs uma a uma; para na primeira que não responder.
fn start_secondaries(kernel: &Kernel, boot_root: u32) {
    let starter = SipiStarter::new(boot_root);
    for cpu in 1..kernel.smp.nr_cpus() {
        let sched = kernel.sched.clone();
        let entry = Box::new(move || {
            sched.init_cpu();
            if !sched.smp().mark_online(cpu) {
                // O BSP desistiu desta CPU
                Cpu::hang();
            }
            Cpu::irq_enable();
            sched.idle_loop()
        });
        if let Err(err) = kernel.smp.boot_secondary(&starter, cpu, entry) {
            crate::kwarn!("(SMP) Seguindo sem as CPUs a partir de ", cpu);
            crate::kwarn!(err.as_str());
            break;
        }
    }
    crate::kinfo!("(SMP) CPUs online: ", kernel.smp.online_mask().count());
}

/// Remove a identidade de 0..4 MiB (trampolim e entrada do `_start`),
/// em todas as CPUs online.
fn drop_identity_map(kernel: &Kernel, boot_root: u32) {
    let pd = (KERNEL_BASE + boot_root) as usize as *mut u32;
    // SAFETY: o diretório de boot está na lowmem, coberto pela janela linear;
    // a PDE 0 só é usada pelo trampolim, que já terminou.
    unsafe { pd.write_volatile(0) };
    Cpu::flush_tlb_local();

    let others = kernel.smp.online_mask().without(Cpu::current_id());
    if !others.is_empty() && kernel.smp.smp_call(others, |_| Cpu::flush_tlb_local(), true).is_err() {
        crate::kwarn!("(SMP) Flush da identidade falhou em alguma CPU");
    }
}
