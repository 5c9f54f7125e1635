//! Property tests for result reconciliation
//!
//! Tests invariants for:
//! - Verdict: a shared outcome survives, any disagreement becomes Partial
//! - Empty input: the error sentinel, never a panic
//! - Accumulation: rejected items and warnings keep input order

use proptest::prelude::*;
use std::time::Duration;
use wwcp_core::reconcile::NO_RESULTS;
use wwcp_core::*;

type Push = PushResult<u16>;

// ============================================================================
// Strategies
// ============================================================================

/// Every outcome a single receiver can report
fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Unspecified),
        Just(Outcome::Success),
        Just(Outcome::NoOperation),
        Just(Outcome::Enqueued),
        Just(Outcome::AdminDown),
        Just(Outcome::OutOfService),
        Just(Outcome::Timeout),
        Just(Outcome::LockTimeout),
        Just(Outcome::Error),
    ]
}

fn rejected() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::vec(any::<u16>(), 0..4)
}

fn warnings() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}", 0..3)
}

/// Outcome, rejected items and warnings of one receiver
fn part() -> impl Strategy<Value = (Outcome, Vec<u16>, Vec<String>)> {
    (outcome(), rejected(), warnings())
}

fn parts() -> impl Strategy<Value = Vec<(Outcome, Vec<u16>, Vec<String>)>> {
    prop::collection::vec(part(), 1..8)
}

/// Build a result the way a receiver would, through its factory
fn result(index: usize, outcome: Outcome, rejected: Vec<u16>, warnings: Vec<String>) -> Push {
    let auth = AuthId::new(format!("r{}", index));
    let result = match outcome {
        Outcome::Unspecified => Push::unspecified(auth),
        Outcome::Success => Push::success(auth),
        Outcome::NoOperation => Push::no_operation(auth),
        Outcome::Enqueued => Push::enqueued(auth),
        Outcome::AdminDown => Push::admin_down(auth, rejected),
        Outcome::OutOfService => Push::out_of_service(auth, rejected),
        Outcome::Timeout => Push::timeout(auth, rejected),
        Outcome::LockTimeout => Push::lock_timeout(auth, rejected),
        Outcome::Error | Outcome::Partial => Push::error(auth, rejected, "failed"),
    };
    result.with_warnings(warnings)
}

fn results(parts: &[(Outcome, Vec<u16>, Vec<String>)]) -> Vec<Push> {
    parts
        .iter()
        .enumerate()
        .map(|(i, (outcome, rejected, warnings))| result(i, *outcome, rejected.clone(), warnings.clone()))
        .collect()
}

fn flatten(results: Vec<Push>) -> Push {
    Push::flatten(AuthId::new("caller"), results, Duration::from_millis(7))
}

// ============================================================================
// Verdict Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: identical outcomes are preserved
    #[test]
    fn uniform_outcome_is_kept(kind in outcome(), n in 1usize..8) {
        let merged = flatten((0..n).map(|i| result(i, kind, Vec::new(), Vec::new())).collect());
        prop_assert_eq!(merged.outcome(), kind);
    }

    /// CORE INVARIANT: any disagreement yields Partial
    #[test]
    fn mixed_outcomes_become_partial(parts in parts()) {
        let first = parts[0].0;
        let uniform = parts.iter().all(|(outcome, _, _)| *outcome == first);
        let merged = flatten(results(&parts));

        if uniform {
            prop_assert_eq!(merged.outcome(), first);
        } else {
            prop_assert_eq!(merged.outcome(), Outcome::Partial);
        }
    }

    /// Merged auth id comes from the first result
    #[test]
    fn first_auth_id_wins(parts in parts()) {
        let merged = flatten(results(&parts));
        prop_assert_eq!(merged.auth_id(), &AuthId::new("r0"));
        prop_assert_eq!(merged.runtime(), Some(Duration::from_millis(7)));
    }
}

// ============================================================================
// Accumulation Property Tests
// ============================================================================

proptest! {
    /// Rejected items and warnings are concatenated in input order
    #[test]
    fn rejected_and_warnings_keep_order(parts in parts()) {
        let merged = flatten(results(&parts));

        let expected_rejected: Vec<u16> = parts
            .iter()
            .filter(|(outcome, _, _)| {
                !matches!(outcome, Outcome::Unspecified | Outcome::Success | Outcome::NoOperation | Outcome::Enqueued)
            })
            .flat_map(|(_, rejected, _)| rejected.iter().copied())
            .collect();
        let expected_warnings: Vec<String> = parts
            .iter()
            .flat_map(|(_, _, warnings)| warnings.iter().cloned())
            .collect();

        prop_assert_eq!(merged.rejected(), expected_rejected.as_slice());
        prop_assert_eq!(merged.warnings(), expected_warnings.as_slice());
    }

    /// Only non-empty descriptions are joined, one per line
    #[test]
    fn descriptions_are_joined(parts in parts()) {
        let merged = flatten(results(&parts));
        let failures = parts.iter().filter(|(outcome, _, _)| *outcome == Outcome::Error).count();

        match merged.description() {
            None => prop_assert_eq!(failures, 0),
            Some(text) => prop_assert_eq!(text.lines().count(), failures),
        }
    }
}

// ============================================================================
// Empty Input Tests
// ============================================================================

#[test]
fn empty_input_yields_sentinel() {
    let merged = flatten(Vec::new());
    assert_eq!(merged.outcome(), Outcome::Error);
    assert_eq!(merged.description(), Some(NO_RESULTS));
    assert_eq!(merged.auth_id(), &AuthId::new("caller"));
    assert!(merged.rejected().is_empty());
}

#[test]
fn empty_pull_yields_sentinel() {
    let merged = PullResult::<u16>::flatten(AuthId::new("caller"), Vec::new(), Duration::ZERO);
    assert_eq!(merged.outcome(), Outcome::Error);
    assert_eq!(merged.description(), Some(NO_RESULTS));
    assert!(merged.data().is_empty());
}
