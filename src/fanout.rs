//! Fan-out of one operation across every target of a resolved set.
//!
//! Two policies:
//! - [`dispatch_until_error`] runs targets in order and stops at the first
//!   failure.
//! - [`dispatch_all`] attempts every target, keeps the non-empty payloads keyed
//!   by pod name and folds each failure into a [`CombinedError`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::{Error, Result};
use crate::models::k8s::Target;

/// Payloads that can be "empty". Empty successes are not stored.
pub trait Contribution {
    fn is_empty(&self) -> bool;
}

impl Contribution for Vec<u8> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl Contribution for String {
    fn is_empty(&self) -> bool {
        String::is_empty(self)
    }
}

impl<T: Contribution> Contribution for Option<T> {
    fn is_empty(&self) -> bool {
        self.as_ref().map_or(true, Contribution::is_empty)
    }
}

/// One failed target within a fan-out.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    pub cause: Error,
}

/// Every per-target failure of a collect-all fan-out, in dispatch order.
#[derive(Debug, Default)]
pub struct CombinedError {
    failures: Vec<TargetFailure>,
}

impl CombinedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: impl Into<String>, cause: Error) {
        self.failures.push(TargetFailure {
            target: target.into(),
            cause,
        });
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[TargetFailure] {
        &self.failures
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetFailure> {
        self.failures.iter()
    }

    /// `None` when nothing was recorded.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.len() {
            1 => writeln!(f, "1 error occurred:")?,
            n => writeln!(f, "{n} errors occurred:")?,
        }
        for failure in &self.failures {
            writeln!(f, "\t* {}: {}", failure.target, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {}

/// Payloads keyed by pod name, plus every failure seen along the way.
#[derive(Debug)]
pub struct AggregateResult<T> {
    results: BTreeMap<String, T>,
    errors: CombinedError,
}

impl<T> Default for AggregateResult<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            errors: CombinedError::new(),
        }
    }
}

impl<T: Contribution> AggregateResult<T> {
    fn record(&mut self, target: &Target, outcome: Result<T>) {
        match outcome {
            Ok(payload) if payload.is_empty() => {
                log::debug!("fanout: {target} returned an empty payload, skipping");
            }
            Ok(payload) => {
                self.results.insert(target.name.clone(), payload);
            }
            Err(e) => {
                log::debug!("fanout: {target} failed: {e}");
                self.errors.push(target.name.clone(), e);
            }
        }
    }
}

impl<T> AggregateResult<T> {
    pub fn results(&self) -> &BTreeMap<String, T> {
        &self.results
    }

    pub fn errors(&self) -> Option<&CombinedError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(&self.errors)
        }
    }

    pub fn into_parts(self) -> (BTreeMap<String, T>, Option<CombinedError>) {
        (self.results, self.errors.into_option())
    }

    /// Fails only when nothing was collected and at least one target failed.
    /// Partial failures stay attached to the returned aggregate.
    pub fn finish(self) -> Result<Self> {
        if self.results.is_empty() && !self.errors.is_empty() {
            return Err(Error::Combined(self.errors));
        }
        Ok(self)
    }
}

/// Attempts `invoke` on every target, at most `concurrency` at a time.
///
/// Outcomes are folded into the aggregate by a single owner in target order,
/// so the failure list is deterministic regardless of completion order.
pub async fn dispatch_all<T, F, Fut>(
    targets: &[Target],
    concurrency: usize,
    invoke: F,
) -> AggregateResult<T>
where
    T: Contribution,
    F: Fn(Target) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    stream::iter(targets.iter().cloned())
        .map(|target| {
            let call = invoke(target.clone());
            async move { (target, call.await) }
        })
        .buffered(concurrency.max(1))
        .fold(AggregateResult::default(), |mut agg, (target, outcome)| async move {
            agg.record(&target, outcome);
            agg
        })
        .await
}

/// Runs `invoke` on each target in order, returning the first failure as is.
pub async fn dispatch_until_error<T, F, Fut>(
    targets: &[Target],
    invoke: F,
) -> Result<BTreeMap<String, T>>
where
    T: Contribution,
    F: Fn(Target) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut results = BTreeMap::new();
    for target in targets {
        let payload = invoke(target.clone()).await?;
        if !payload.is_empty() {
            results.insert(target.name.clone(), payload);
        }
    }
    Ok(results)
}
