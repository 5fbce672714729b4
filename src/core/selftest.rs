/// Arquivo: core/selftest.rs
///
/// Propósito: Autoteste de boot. Roda sobre o núcleo recém-montado, antes
/// de ligar as interrupções, e reporta na serial (`selftest=on` ou feature
/// `self_test`).
///
/// Cada caso cria e destrói o que usa: o núcleo volta ao estado de antes.

use crate::core::kernel::Kernel;
use crate::core::irq::{vectors, InterruptFrame};
use crate::klib::test_framework::{run_test_suite, SuiteReport, TestCase, TestResult};
use crate::mm::pmm::{AllocFlags, FrameUsage};
use crate::mm::{audit, Asid, FaultError, FaultResult, Protection, Translation, VirtAddr, Vma};
use crate::syscall::numbers::{SYS_GETPID, SYS_SCHED_YIELD};
use crate::syscall::SyscallEnv;

const PROBE_START: u32 = 0x40_0000;
const PROBE_END: u32 = 0x40_2000;

const MM_TESTS: &[TestCase<Kernel>] = &[
    TestCase {
        name: "pmm: alocação zerada e devolução",
        func: pmm_alloc_free,
    },
    TestCase {
        name: "vmm: demand-zero no primeiro toque",
        func: demand_zero,
    },
    TestCase {
        name: "vmm: fork com copy-on-write",
        func: cow_fork,
    },
    TestCase {
        name: "mm: auditoria de invariantes",
        func: audit_clean,
    },
];

const TRAP_TESTS: &[TestCase<Kernel>] = &[
    TestCase {
        name: "syscall: getpid pelo vetor 0x80",
        func: syscall_getpid,
    },
    TestCase {
        name: "syscall: número inválido devolve ENOSYS",
        func: syscall_enosys,
    },
    TestCase {
        name: "syscall: sched_yield no contexto de boot",
        func: syscall_yield,
    },
];

/// Roda todas as suites e devolve o placar somado.
pub fn run(kernel: &Kernel) -> SuiteReport {
    let mut report = run_test_suite("mm", kernel, MM_TESTS);
    report.merge(run_test_suite("trap", kernel, TRAP_TESTS));
    if report.ok() {
        crate::kok!("(Selftest) Todas as suites passaram");
    } else {
        crate::kerror!("(Selftest) Falhas: ", report.failed);
    }
    report
}

fn va(addr: u32) -> VirtAddr {
    VirtAddr::new(addr)
}

fn probe_space(kernel: &Kernel) -> Option<Asid> {
    let asid = kernel.vmm.create_space().ok()?;
    let vma = Vma::anonymous(PROBE_START, PROBE_END, Protection::RW);
    if kernel.vmm.map_region(asid, vma).is_err() {
        let _ = kernel.vmm.destroy_space(asid);
        return None;
    }
    Some(asid)
}

fn pmm_alloc_free(kernel: &Kernel) -> TestResult {
    let pmm = kernel.vmm.pmm();
    let before = pmm.free_frames();
    let Ok(pfn) = pmm.alloc_page(FrameUsage::Anon, AllocFlags::ZERO) else {
        return TestResult::Failed;
    };
    let zeroed = pmm.with_page(pfn, |page| page.iter().all(|&b| b == 0));
    let counted = pmm.refcount(pfn) == 1 && pmm.free_frames() == before - 1;
    let freed = pmm.put(pfn);
    (zeroed && counted && freed && pmm.free_frames() == before).into()
}

fn demand_zero(kernel: &Kernel) -> TestResult {
    let Some(asid) = probe_space(kernel) else {
        return TestResult::Failed;
    };
    let vmm = &kernel.vmm;
    let first = vmm.fault(asid, va(PROBE_START), FaultError::USER | FaultError::WRITE);
    let mapped = matches!(vmm.translate(asid, va(PROBE_START)), Ok(Translation::Mapped { .. }));
    let untouched = vmm.translate(asid, va(PROBE_START + 0x1000)) == Ok(Translation::NotMapped);

    let mut seen = [0xFFu8; 16];
    let zero = vmm.read_user(asid, va(PROBE_START), &mut seen).is_ok() && seen.iter().all(|&b| b == 0);

    let ok = first == FaultResult::Handled && mapped && untouched && zero;
    (vmm.destroy_space(asid).is_ok() && ok).into()
}

fn cow_fork(kernel: &Kernel) -> TestResult {
    let Some(parent) = probe_space(kernel) else {
        return TestResult::Failed;
    };
    let vmm = &kernel.vmm;
    if vmm.write_user(parent, va(PROBE_START), b"pai").is_err() {
        let _ = vmm.destroy_space(parent);
        return TestResult::Failed;
    }
    let Ok(child) = vmm.clone_space(parent) else {
        let _ = vmm.destroy_space(parent);
        return TestResult::Failed;
    };

    let wrote = vmm.write_user(child, va(PROBE_START), b"FILHO").is_ok();
    let mut seen = [0u8; 3];
    let isolated = vmm.read_user(parent, va(PROBE_START), &mut seen).is_ok() && &seen == b"pai";

    let frames = |asid| match vmm.translate(asid, va(PROBE_START)) {
        Ok(Translation::Mapped { pfn, .. }) => Some(pfn),
        _ => None,
    };
    let split = matches!((frames(parent), frames(child)), (Some(a), Some(b)) if a != b);

    let destroyed = vmm.destroy_space(child).is_ok() && vmm.destroy_space(parent).is_ok();
    (wrote && isolated && split && destroyed).into()
}

fn audit_clean(kernel: &Kernel) -> TestResult {
    audit::audit_and_log(&kernel.vmm).into()
}

fn syscall(kernel: &Kernel, num: usize) -> InterruptFrame {
    let mut frame = InterruptFrame::user(vectors::SYSCALL);
    frame.eax = num as u32;
    let env = SyscallEnv { sched: &kernel.sched };
    kernel.syscalls.dispatch(&env, &mut frame);
    frame
}

fn syscall_getpid(kernel: &Kernel) -> TestResult {
    let Some(current) = kernel.sched.try_current() else {
        return TestResult::Skipped;
    };
    (syscall(kernel, SYS_GETPID).eax == current.id().pid()).into()
}

fn syscall_enosys(kernel: &Kernel) -> TestResult {
    let frame = syscall(kernel, crate::core::config::NR_SYSCALLS + 7);
    (frame.eax as i32 == -38).into()
}

fn syscall_yield(kernel: &Kernel) -> TestResult {
    (syscall(kernel, SYS_SCHED_YIELD).eax == 0).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::KernelConfig;
    use crate::core::irq::chip::recording::RecordingChip;
    use crate::klib::testkit::Machine;
    use alloc::sync::Arc;

    #[test]
    fn boot_suites_pass_on_a_fresh_kernel() {
        let rig = Machine::with_memory(1);
        let kernel = Kernel::new(
            KernelConfig::default(),
            rig.sched.clone(),
            rig.vmm().clone(),
            Arc::new(RecordingChip::default()),
        )
        .unwrap();
        let free = rig.vmm().pmm().free_frames();

        let report = run(&kernel);
        assert_eq!(report.failed, 0, "{report:?}");
        assert_eq!(report.passed, MM_TESTS.len() + TRAP_TESTS.len());
        // Os casos devolvem tudo que alocam
        assert_eq!(rig.vmm().pmm().free_frames(), free);
        assert!(rig.vmm().spaces().is_empty());
    }
}
