//! Restore planning by greedy set cover
//!
//! Choosing the fewest volumes that together hold every requested path is
//! set cover, which is NP-hard. The greedy rule used here takes, at each
//! step, the volume holding the most still-uncovered paths, lowest label
//! first on ties. The result is within a logarithmic factor of optimal and
//! fully deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// One volume to make available and the paths it will supply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedVolume {
    pub label: String,
    pub paths: Vec<String>,
}

/// Ordered volume sequence for a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestorePlan {
    pub volumes: Vec<PlannedVolume>,
    /// Paths no usable volume holds
    pub unrecoverable: Vec<String>,
}

impl RestorePlan {
    pub fn labels(&self) -> Vec<&str> {
        self.volumes.iter().map(|v| v.label.as_str()).collect()
    }
}

/// Plan a cover of `paths`, where each path maps to the volumes holding
/// it. Labels for which `usable` returns false are never chosen.
pub fn plan_cover(
    paths: &BTreeMap<String, BTreeSet<String>>,
    usable: impl Fn(&str, &str) -> bool,
) -> RestorePlan {
    let mut plan = RestorePlan::default();
    let mut holdings: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut uncovered: BTreeSet<&str> = BTreeSet::new();

    for (path, copies) in paths {
        let mut any = false;
        for label in copies.iter().filter(|l| usable(path, l.as_str())) {
            holdings.entry(label.as_str()).or_default().insert(path.as_str());
            any = true;
        }
        if any {
            uncovered.insert(path.as_str());
        } else {
            plan.unrecoverable.push(path.clone());
        }
    }

    while !uncovered.is_empty() {
        // Strictly greater keeps the lowest label on ties
        let mut best: Option<(&str, usize)> = None;
        for (label, held) in &holdings {
            let gain = held.iter().filter(|p| uncovered.contains(*p)).count();
            if gain > 0 && best.map(|(_, g)| gain > g).unwrap_or(true) {
                best = Some((*label, gain));
            }
        }
        let Some((label, _)) = best else {
            break;
        };

        let covered: Vec<&str> = holdings[label]
            .iter()
            .copied()
            .filter(|p| uncovered.contains(p))
            .collect();
        for path in &covered {
            uncovered.remove(path);
        }
        plan.volumes.push(PlannedVolume {
            label: label.to_string(),
            paths: covered.into_iter().map(str::to_string).collect(),
        });
        holdings.remove(label);
    }

    plan
}
