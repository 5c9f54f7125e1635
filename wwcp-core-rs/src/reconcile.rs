//! Reconciliation of per-receiver results
//!
//! All results of one fan-out are merged into one: if every receiver agreed
//! on the outcome the merged result keeps it, otherwise it is `Partial`.
//! Descriptions (non-empty ones, newline-joined), rejected items, pulled data
//! and warnings are concatenated in input order.
//!
//! The rule is not associative: flattening a subset of the results can give
//! a different verdict than flattening all of them, so always pass the
//! complete result set of one operation.

use std::time::Duration;
use tracing::warn;

use crate::push::{Outcome, PullResult, PushResult};
use crate::types::AuthId;

/// Description of the result returned when there was nothing to flatten
pub const NO_RESULTS: &str = "no results";

/// The shared outcome, `Partial` if they differ, `None` if there are none
fn common_outcome(outcomes: impl IntoIterator<Item = Outcome>) -> Option<Outcome> {
    let mut outcomes = outcomes.into_iter();
    let first = outcomes.next()?;
    if outcomes.all(|outcome| outcome == first) {
        Some(first)
    } else {
        Some(Outcome::Partial)
    }
}

fn join_descriptions(descriptions: Vec<String>) -> Option<String> {
    if descriptions.is_empty() {
        None
    } else {
        Some(descriptions.join("\n"))
    }
}

pub fn flatten_push<P, R>(
    auth_id: AuthId,
    results: impl IntoIterator<Item = PushResult<P, R>>,
    runtime: Duration,
) -> PushResult<P, R> {
    let results: Vec<_> = results.into_iter().collect();
    let Some(outcome) = common_outcome(results.iter().map(|r| r.outcome())) else {
        warn!("{}: flatten called without any results", auth_id);
        return PushResult::error(auth_id, Vec::new(), NO_RESULTS).with_runtime(runtime);
    };

    let mut merged_auth_id = None;
    let mut descriptions = Vec::new();
    let mut rejected = Vec::new();
    let mut warnings = Vec::new();

    for result in results {
        let (auth_id, _, description, result_rejected, result_warnings) = result.into_parts();
        merged_auth_id.get_or_insert(auth_id);
        descriptions.extend(description.filter(|d| !d.is_empty()));
        rejected.extend(result_rejected);
        warnings.extend(result_warnings);
    }

    PushResult::from_parts(
        merged_auth_id.unwrap_or(auth_id),
        outcome,
        join_descriptions(descriptions),
        rejected,
        warnings,
        Some(runtime),
    )
}

pub fn flatten_pull<T>(auth_id: AuthId, results: impl IntoIterator<Item = PullResult<T>>, runtime: Duration) -> PullResult<T> {
    let results: Vec<_> = results.into_iter().collect();
    let Some(outcome) = common_outcome(results.iter().map(|r| r.outcome())) else {
        warn!("{}: flatten called without any results", auth_id);
        return PullResult::error(auth_id, NO_RESULTS).with_runtime(runtime);
    };

    let mut merged_auth_id = None;
    let mut descriptions = Vec::new();
    let mut data = Vec::new();
    let mut warnings = Vec::new();

    for result in results {
        let (auth_id, _, description, result_data, result_warnings) = result.into_parts();
        merged_auth_id.get_or_insert(auth_id);
        descriptions.extend(description.filter(|d| !d.is_empty()));
        data.extend(result_data);
        warnings.extend(result_warnings);
    }

    PullResult::from_parts(
        merged_auth_id.unwrap_or(auth_id),
        outcome,
        join_descriptions(descriptions),
        data,
        warnings,
        Some(runtime),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    type Push = PushResult<&'static str>;

    fn auth(id: &str) -> AuthId {
        AuthId::new(id)
    }

    #[test]
    fn test_all_success_stays_success() {
        let merged = Push::flatten(
            auth("caller"),
            vec![Push::success(auth("hub")), Push::success(auth("hub"))],
            Duration::from_millis(40),
        );
        assert_eq!(merged.outcome(), Outcome::Success);
        assert_eq!(merged.description(), None);
        assert_eq!(merged.runtime(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_mixed_outcomes_are_partial() {
        let merged = Push::flatten(
            auth("caller"),
            vec![
                Push::success(auth("hub")),
                Push::error(auth("hub"), vec!["E2"], "boom"),
            ],
            Duration::ZERO,
        );
        assert_eq!(merged.outcome(), Outcome::Partial);
        assert_eq!(merged.rejected(), ["E2"]);
        assert_eq!(merged.description(), Some("boom"));
    }

    #[test]
    fn test_success_and_enqueued_are_partial() {
        let merged = Push::flatten(
            auth("caller"),
            vec![Push::success(auth("hub")), Push::enqueued(auth("hub"))],
            Duration::ZERO,
        );
        assert_eq!(merged.outcome(), Outcome::Partial);
    }

    #[test]
    fn test_uniform_failure_kind_is_kept() {
        let merged = Push::flatten(
            auth("caller"),
            vec![
                Push::timeout(auth("hub"), vec!["E1"]),
                Push::timeout(auth("hub"), vec!["E2", "E3"]),
            ],
            Duration::ZERO,
        );
        assert_eq!(merged.outcome(), Outcome::Timeout);
        assert_eq!(merged.rejected(), ["E1", "E2", "E3"]);
    }

    #[test]
    fn test_empty_input_is_error_sentinel() {
        let merged = Push::flatten(auth("caller"), Vec::new(), Duration::from_millis(1));
        assert_eq!(merged.outcome(), Outcome::Error);
        assert_eq!(merged.description(), Some(NO_RESULTS));
        assert_eq!(merged.auth_id(), &auth("caller"));
        assert!(merged.rejected().is_empty());
    }

    #[test]
    fn test_concatenation_order() {
        let merged = Push::flatten(
            auth("caller"),
            vec![
                Push::error(auth("first"), vec!["a"], "one").with_warning("w1"),
                Push::success(auth("second")).with_description(""),
                Push::error(auth("third"), vec!["b", "c"], "three").with_warning("w2"),
            ],
            Duration::ZERO,
        );
        assert_eq!(merged.auth_id(), &auth("first"));
        assert_eq!(merged.description(), Some("one\nthree"));
        assert_eq!(merged.rejected(), ["a", "b", "c"]);
        assert_eq!(merged.warnings(), ["w1".to_string(), "w2".to_string()]);
    }

    #[test]
    fn test_pull_flatten_concatenates_data() {
        let merged = PullResult::flatten(
            auth("caller"),
            vec![
                PullResult::success(auth("hub"), vec![1, 2]),
                PullResult::success(auth("hub"), vec![3]),
            ],
            Duration::ZERO,
        );
        assert_eq!(merged.outcome(), Outcome::Success);
        assert_eq!(merged.data(), [1, 2, 3]);

        let merged = PullResult::flatten(
            auth("caller"),
            vec![PullResult::success(auth("hub"), vec![1]), PullResult::admin_down(auth("hub"))],
            Duration::ZERO,
        );
        assert_eq!(merged.outcome(), Outcome::Partial);
        assert_eq!(merged.data(), [1]);

        let merged = PullResult::<u8>::flatten(auth("caller"), Vec::new(), Duration::ZERO);
        assert_eq!(merged.description(), Some(NO_RESULTS));
    }
}
