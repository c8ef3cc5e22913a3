use crate::value::{merge_payload, Payload, Value};
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_REL_TOL: f64 = 1e-5;
pub const DEFAULT_ABS_TOL: f64 = 1e-5;

/// One-shot camera actions. They are stripped before comparison and force a dispatch when present.
pub const DEFAULT_CAMERA_COMMANDS: &[&str] = &[
    "center",
    "reset",
    "reset_view",
    "resetView",
    "fit_to_view",
    "fitToView",
    "focus_on",
    "focusOn",
    "auto_fit",
    "autoFit",
];

/// Structural comparator with float tolerance: `|a-b| <= max(rel_tol * max(|a|,|b|), abs_tol)`.
#[derive(Debug, Clone)]
pub struct ToleranceComparator {
    rel_tol: f64,
    abs_tol: f64,
    excluded_keys: BTreeSet<String>,
}

impl Default for ToleranceComparator {
    fn default() -> Self {
        Self::new(DEFAULT_REL_TOL, DEFAULT_ABS_TOL, DEFAULT_CAMERA_COMMANDS.iter().copied())
    }
}

impl ToleranceComparator {
    pub fn new<I, S>(rel_tol: f64, abs_tol: f64, excluded_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rel_tol: rel_tol.abs(),
            abs_tol: abs_tol.abs(),
            excluded_keys: excluded_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluded_keys(&self) -> impl Iterator<Item = &str> {
        self.excluded_keys.iter().map(String::as_str)
    }

    pub fn numbers_close(&self, a: f64, b: f64) -> bool {
        if a == b {
            return true;
        }
        let bound = (self.rel_tol * a.abs().max(b.abs())).max(self.abs_tol);
        (a - b).abs() <= bound
    }

    /// Splits off excluded top-level keys. Returns the structural remainder and whether any were found.
    pub fn strip(&self, payload: &Payload) -> (Payload, bool) {
        let mut had_excluded = false;
        let mut rest = Payload::new();
        for (key, value) in payload {
            if self.excluded_keys.contains(key) {
                had_excluded = true;
            } else {
                rest.insert(key.clone(), value.clone());
            }
        }
        (rest, had_excluded)
    }

    pub fn values_match(&self, candidate: &Value, reference: &Value) -> bool {
        match (candidate, reference) {
            (Value::Number(a), Value::Number(b)) => self.numbers_close(*a, *b),
            (Value::Map(a), Value::Map(b)) => self.covered_by(a, b),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values_match(x, y))
            }
            (Value::NumericBuffer(a), Value::NumericBuffer(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.numbers_close(*x, *y))
            }
            (a, b) => a == b,
        }
    }

    /// True when every leaf of `candidate` has a matching leaf in `reference`.
    pub fn covered_by(&self, candidate: &Payload, reference: &Payload) -> bool {
        candidate.iter().all(|(key, value)| {
            reference.get(key).map(|existing| self.values_match(value, existing)).unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub enum DedupPolicy {
    #[default]
    Always,
    Tolerance(ToleranceComparator),
}

/// Decides whether a category payload is worth sending, and remembers what was last sent.
#[derive(Debug, Default)]
pub struct DedupGuard {
    policies: HashMap<String, DedupPolicy>,
    snapshots: HashMap<String, Payload>,
    suppressed: u64,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, category: impl Into<String>, policy: DedupPolicy) -> Self {
        self.set_policy(category, policy);
        self
    }

    pub fn set_policy(&mut self, category: impl Into<String>, policy: DedupPolicy) {
        self.policies.insert(category.into(), policy);
    }

    pub fn policy(&self, category: &str) -> &DedupPolicy {
        static ALWAYS: DedupPolicy = DedupPolicy::Always;
        self.policies.get(category).unwrap_or(&ALWAYS)
    }

    pub fn should_dispatch(&mut self, category: &str, payload: &Payload) -> bool {
        let DedupPolicy::Tolerance(comparator) = self.policy(category) else {
            self.remember(category, payload.clone());
            return true;
        };
        let (structural, had_command) = comparator.strip(payload);
        let unchanged = !had_command
            && self.snapshots.get(category).map(|last| comparator.covered_by(&structural, last)).unwrap_or(false);
        if unchanged {
            self.suppressed += 1;
            return false;
        }
        self.remember(category, structural);
        true
    }

    pub fn last_snapshot(&self, category: &str) -> Option<&Payload> {
        self.snapshots.get(category)
    }

    /// Puts back the snapshot taken before a dispatch that never reached the scene, so the same
    /// values are not suppressed on the next edit.
    pub fn restore(&mut self, category: &str, snapshot: Option<Payload>) {
        match snapshot {
            Some(snapshot) => {
                self.snapshots.insert(category.to_string(), snapshot);
            }
            None => {
                self.snapshots.remove(category);
            }
        }
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn clear_snapshots(&mut self) {
        self.snapshots.clear();
        self.suppressed = 0;
    }

    fn remember(&mut self, category: &str, payload: Payload) {
        merge_payload(self.snapshots.entry(category.to_string()).or_default(), payload);
    }
}
