//! Status predicates and the observation history they are evaluated against.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Bound, RangeBounds};

use tokio::time::Instant;

use crate::ConvergeError;

/// One reading of a remote entity's reported state.
///
/// `counts` carries the per-state instance breakdown for multi-instance
/// entities; it is empty for entities that only report a single state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<S> {
    pub state: S,
    pub counts: BTreeMap<S, u32>,
}

impl<S: Ord> Observation<S> {
    /// Observation of a single-state entity.
    pub fn new(state: S) -> Self {
        Self {
            state,
            counts: BTreeMap::new(),
        }
    }

    /// Observation with a per-state instance breakdown.
    pub fn with_counts(state: S, counts: impl IntoIterator<Item = (S, u32)>) -> Self {
        Self {
            state,
            counts: counts.into_iter().collect(),
        }
    }

    /// Number of instances reported in `state`; missing entries count as zero.
    pub fn count(&self, state: &S) -> u32 {
        self.counts.get(state).copied().unwrap_or(0)
    }
}

impl<S: fmt::Display> fmt::Display for Observation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if !self.counts.is_empty() {
            let stats: Vec<String> = self
                .counts
                .iter()
                .map(|(state, n)| format!("{}: {n}", state.to_string().to_lowercase()))
                .collect();
            write!(f, " ({})", stats.join(", "))?;
        }
        Ok(())
    }
}

/// An observation stamped with the time it was taken.
#[derive(Debug, Clone)]
pub struct Record<S> {
    pub observation: Observation<S>,
    pub at: Instant,
}

/// Ordered sequence of observations taken by one poller.
#[derive(Debug, Clone)]
pub struct History<S> {
    records: Vec<Record<S>>,
}

impl<S> Default for History<S> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<S: PartialEq> History<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation taken now.
    pub fn push(&mut self, observation: Observation<S>) {
        self.push_at(observation, Instant::now());
    }

    /// Append an observation taken at `at`.
    pub fn push_at(&mut self, observation: Observation<S>, at: Instant) {
        self.records.push(Record { observation, at });
    }

    pub fn latest(&self) -> Option<&Observation<S>> {
        self.records.last().map(|r| &r.observation)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent maximal run of consecutive observations in `state`.
    ///
    /// Empty when the latest observation is in a different state. Any
    /// interrupting observation ends the previous run for good.
    pub fn trailing_run(&self, state: &S) -> &[Record<S>] {
        let start = self
            .records
            .iter()
            .rposition(|r| &r.observation.state != state)
            .map_or(0, |i| i + 1);
        &self.records[start..]
    }
}

/// Outcome of evaluating a predicate against a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Target condition holds.
    Satisfied,

    /// Not there yet; keep polling.
    Pending,

    /// An explicit failure state was observed; stop polling.
    Failed,
}

/// Unit in which residency is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyUnit {
    /// Number of consecutive observations in the state.
    Ticks,

    /// Seconds between the first and the latest observation of the run.
    Seconds,
}

/// A numeric interval with independently open, closed or unbounded ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRange {
    lower: Bound<f64>,
    upper: Bound<f64>,
}

impl StateRange {
    /// Build a range from any `RangeBounds<f64>`, e.g. `1.0..` or `..=0.0`.
    ///
    /// Rejects NaN endpoints and empty intervals.
    pub fn new(range: impl RangeBounds<f64>) -> Result<Self, ConvergeError> {
        let lower = range.start_bound().cloned();
        let upper = range.end_bound().cloned();

        let endpoint = |b: &Bound<f64>| match b {
            Bound::Included(v) | Bound::Excluded(v) => Some(*v),
            Bound::Unbounded => None,
        };

        let (lo, hi) = (endpoint(&lower), endpoint(&upper));
        if lo.is_some_and(f64::is_nan) || hi.is_some_and(f64::is_nan) {
            return Err(ConvergeError::InvalidConfig(
                "range endpoint is NaN".to_string(),
            ));
        }

        if let (Some(lo), Some(hi)) = (lo, hi) {
            let both_closed =
                matches!(lower, Bound::Included(_)) && matches!(upper, Bound::Included(_));
            if lo > hi || (lo == hi && !both_closed) {
                return Err(ConvergeError::InvalidConfig(format!(
                    "empty range: lower bound {lo} is not below upper bound {hi}"
                )));
            }
        }

        Ok(Self { lower, upper })
    }

    /// `[lower, +inf)`
    pub fn at_least(lower: f64) -> Result<Self, ConvergeError> {
        Self::new(lower..)
    }

    /// `(-inf, upper]`
    pub fn at_most(upper: f64) -> Result<Self, ConvergeError> {
        Self::new(..=upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.lower, self.upper).contains(&value)
    }
}

impl fmt::Display for StateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            Bound::Included(v) => write!(f, "[{v}, ")?,
            Bound::Excluded(v) => write!(f, "({v}, ")?,
            Bound::Unbounded => write!(f, "(-inf, ")?,
        }
        match self.upper {
            Bound::Included(v) => write!(f, "{v}]"),
            Bound::Excluded(v) => write!(f, "{v})"),
            Bound::Unbounded => write!(f, "inf)"),
        }
    }
}

/// How a predicate decides it has been met.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode<S> {
    /// Latest state equals the target; optionally abort on `failed`.
    Exact { failed: Option<S> },

    /// Continuous residency in the target state falls inside `range`.
    Residency { range: StateRange, unit: ResidencyUnit },

    /// Instance count in the target state falls inside `range`.
    InstanceCount { range: StateRange },
}

/// Declarative target condition over a named state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPredicate<S> {
    target: S,
    mode: Mode<S>,
}

impl<S> StatusPredicate<S>
where
    S: Clone + Ord + fmt::Display,
{
    /// Satisfied once the latest observation is `target`.
    pub fn exact(target: S) -> Self {
        Self {
            target,
            mode: Mode::Exact { failed: None },
        }
    }

    /// Like [`exact`](Self::exact), but fails fast when `failed` is observed first.
    pub fn exact_or_fail(target: S, failed: S) -> Self {
        Self {
            target,
            mode: Mode::Exact {
                failed: Some(failed),
            },
        }
    }

    /// Satisfied once continuous residency in `target` lies within `range`.
    pub fn residency(
        target: S,
        range: impl RangeBounds<f64>,
        unit: ResidencyUnit,
    ) -> Result<Self, ConvergeError> {
        Ok(Self {
            target,
            mode: Mode::Residency {
                range: StateRange::new(range)?,
                unit,
            },
        })
    }

    /// Satisfied once the latest instance count in `target` lies within `range`.
    pub fn instance_count(target: S, range: impl RangeBounds<f64>) -> Result<Self, ConvergeError> {
        Ok(Self {
            target,
            mode: Mode::InstanceCount {
                range: StateRange::new(range)?,
            },
        })
    }

    pub fn target(&self) -> &S {
        &self.target
    }

    pub fn mode(&self) -> &Mode<S> {
        &self.mode
    }

    /// Evaluate against everything observed so far.
    pub fn evaluate(&self, history: &History<S>) -> Verdict {
        let Some(latest) = history.latest() else {
            return Verdict::Pending;
        };

        match &self.mode {
            Mode::Exact { failed } => {
                if latest.state == self.target {
                    Verdict::Satisfied
                } else if failed.as_ref() == Some(&latest.state) {
                    Verdict::Failed
                } else {
                    Verdict::Pending
                }
            }
            Mode::Residency { range, unit } => {
                let run = history.trailing_run(&self.target);
                let residency = match (unit, run.first(), run.last()) {
                    (ResidencyUnit::Ticks, _, _) => run.len() as f64,
                    (ResidencyUnit::Seconds, Some(first), Some(last)) => {
                        last.at.duration_since(first.at).as_secs_f64()
                    }
                    (ResidencyUnit::Seconds, _, _) => 0.0,
                };
                satisfied_if(range.contains(residency))
            }
            Mode::InstanceCount { range } => {
                satisfied_if(range.contains(f64::from(latest.count(&self.target))))
            }
        }
    }
}

fn satisfied_if(cond: bool) -> Verdict {
    if cond {
        Verdict::Satisfied
    } else {
        Verdict::Pending
    }
}

impl<S: fmt::Display> fmt::Display for StatusPredicate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Mode::Exact { failed: None } => write!(f, "state == {}", self.target),
            Mode::Exact {
                failed: Some(failed),
            } => write!(f, "state == {} (abort on {failed})", self.target),
            Mode::Residency { range, unit } => {
                let unit = match unit {
                    ResidencyUnit::Ticks => "ticks",
                    ResidencyUnit::Seconds => "s",
                };
                write!(f, "residency({}) in {range} {unit}", self.target)
            }
            Mode::InstanceCount { range } => write!(f, "count({}) in {range}", self.target),
        }
    }
}
