//! Invariant checking with contract-test support
//!
//! Internal pipeline invariants (sample counts, averaging windows, sweep
//! ordering) are checked with [`assert_invariant!`]. Every check is recorded
//! per thread so tests can assert that a code path actually exercised the
//! invariants it promises.
//!
//! A violated invariant is logged at `error` level and yields `false`. Debug
//! builds additionally panic so violations are caught in tests.
//!
//! ```rust,ignore
//! use crabalign::invariant_ppt::*;
//!
//! if !assert_invariant!(samples.len() == 10, "Solver input has ten samples", "solver") {
//!     return Err(SolverError::SampleCount { expected: 10, got: samples.len() });
//! }
//!
//! #[test]
//! fn contract_solver() {
//!     contract_test("solver", &["Solver input has ten samples"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Check an invariant, record it for contract tests, and evaluate to the
/// condition.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__check_invariant($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __check_invariant(condition: bool, message: &str, context: Option<&str>) -> bool {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("invariant violated [{}]: {}", ctx, message);
        if cfg!(debug_assertions) {
            panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
        }
    }
    condition
}

/// Panic unless every listed invariant was checked on this thread.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let log = INVARIANT_LOG.with(|log| log.borrow().clone());

    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !log.contains(*invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().clear();
    });
}
