//! Framework de testes do kernel
//!
//! Suites de autoteste rodadas no boot (feature `self_test`). Cada caso recebe
//! o contexto do subsistema testado em vez de tocar estado global.

/// Resultado de teste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    Failed,
    Skipped,
}

impl From<bool> for TestResult {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Passed
        } else {
            Self::Failed
        }
    }
}

/// Um caso de teste
pub struct TestCase<C: ?Sized> {
    pub name: &'static str,
    pub func: fn(&C) -> TestResult,
}

/// Contagem final de uma suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SuiteReport {
    pub fn merge(&mut self, other: SuiteReport) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn ok(&self) -> bool {
        self.failed == 0
    }
}

/// Executa suite de testes
pub fn run_test_suite<C: ?Sized>(name: &str, ctx: &C, tests: &[TestCase<C>]) -> SuiteReport {
    crate::kinfo!("=== Executando suite:");
    crate::kinfo!(name);

    let mut report = SuiteReport::default();

    for test in tests {
        match (test.func)(ctx) {
            TestResult::Passed => {
                crate::kok!(test.name);
                report.passed += 1;
            }
            TestResult::Failed => {
                crate::kerror!(test.name);
                report.failed += 1;
            }
            TestResult::Skipped => {
                crate::kwarn!(test.name);
                report.skipped += 1;
            }
        }
    }

    crate::kinfo!("Resultados: passed=", report.passed);
    if report.failed > 0 {
        crate::kerror!("Resultados: failed=", report.failed);
    }
    report
}
