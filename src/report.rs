//! Ordering audit findings for output.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::audit::Violation;

/// How violations are sorted in a report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationOrder {
    /// By zone, then by the time of the signature.
    #[default]
    Zone,

    /// By the time of the signature, then by zone.
    Time,
}

/// Sort `violations` and drop all but the last of those sharing a zone
/// and signature time.
pub fn report(
    violations: impl IntoIterator<Item = Violation>,
    order: ViolationOrder,
) -> Vec<Violation> {
    let violations = violations.into_iter();
    match order {
        ViolationOrder::Zone => {
            collapse(violations.map(|v| ((v.zone().clone(), v.signed_at()), v)))
        }
        ViolationOrder::Time => {
            collapse(violations.map(|v| ((v.signed_at(), v.zone().clone()), v)))
        }
    }
}

/// Values in key order, keeping the last value given for each key.
fn collapse<K: Ord, V>(entries: impl IntoIterator<Item = (K, V)>) -> Vec<V> {
    entries
        .into_iter()
        .collect::<BTreeMap<K, V>>()
        .into_values()
        .collect()
}
