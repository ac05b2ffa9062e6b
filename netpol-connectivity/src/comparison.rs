//! Cell-wise comparison of expected (simulated) and observed (cluster) probes

use netpol_core::Protocol;
use netpol_probe::{Probe, TruthTable};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    Same,
    Different,
    Ignored,
}

impl Comparison {
    pub fn short(&self) -> &'static str {
        match self {
            Comparison::Same => ".",
            Comparison::Different => "X",
            Comparison::Ignored => "?",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonCounts {
    pub same: usize,
    pub different: usize,
    pub ignored: usize,
}

impl ComparisonCounts {
    pub fn add(&mut self, comparison: Comparison) {
        match comparison {
            Comparison::Same => self.same += 1,
            Comparison::Different => self.different += 1,
            Comparison::Ignored => self.ignored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.same + self.different + self.ignored
    }
}

impl AddAssign for ComparisonCounts {
    fn add_assign(&mut self, other: Self) {
        self.same += other.same;
        self.different += other.different;
        self.ignored += other.ignored;
    }
}

/// Comparisons keyed by port-protocol label, per (source, destination)
pub type ComparisonCell = BTreeMap<String, Comparison>;

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTable {
    pub table: TruthTable<ComparisonCell>,
}

impl ComparisonTable {
    /// Compare the combined verdicts of two probes over the same resources.
    /// A verdict present on only one side counts as a difference.
    pub fn new(expected: &Probe, actual: &Probe, ignore_loopback: bool) -> Self {
        let table = expected.table.map(|from, to, expected_cell| {
            let actual_cell = actual.table.get(from, to);
            let mut keys: Vec<&String> = expected_cell.into_iter().flat_map(|c| c.keys()).collect();
            keys.extend(actual_cell.into_iter().flat_map(|c| c.keys()));
            keys.sort();
            keys.dedup();

            let cell: ComparisonCell = keys
                .into_iter()
                .map(|key| {
                    let comparison = if ignore_loopback && from == to {
                        Comparison::Ignored
                    } else {
                        let want = expected_cell.and_then(|c| c.get(key)).map(|v| v.combined);
                        let got = actual_cell.and_then(|c| c.get(key)).map(|v| v.combined);
                        if want.is_some() && want == got {
                            Comparison::Same
                        } else {
                            Comparison::Different
                        }
                    };
                    (key.clone(), comparison)
                })
                .collect();
            Some(cell)
        });
        Self { table }
    }

    pub fn counts(&self) -> ComparisonCounts {
        let mut counts = ComparisonCounts::default();
        for (_, _, cell) in self.table.iter() {
            for comparison in cell.into_iter().flat_map(|c| c.values()) {
                counts.add(*comparison);
            }
        }
        counts
    }

    /// Counts split by the protocol half of each port-protocol label
    pub fn counts_by_protocol(&self) -> BTreeMap<Protocol, ComparisonCounts> {
        let mut counts = BTreeMap::<Protocol, ComparisonCounts>::new();
        for (_, _, cell) in self.table.iter() {
            for (key, comparison) in cell.into_iter().flatten() {
                if let Some(protocol) = protocol_of(key) {
                    counts.entry(protocol).or_default().add(*comparison);
                }
            }
        }
        counts
    }

    pub fn is_same(&self) -> bool {
        self.counts().different == 0
    }

    /// One grid per port-protocol label
    pub fn render(&self) -> String {
        let keys: std::collections::BTreeSet<&String> = self
            .table
            .iter()
            .flat_map(|(_, _, cell)| cell.into_iter().flat_map(|c| c.keys()))
            .collect();

        let mut out = String::new();
        for key in keys {
            out.push_str(&format!("{}:\n", key));
            out.push_str(&self.table.render(|cell| {
                cell.and_then(|c| c.get(key))
                    .map(|c| c.short().to_string())
                    .unwrap_or_default()
            }));
            out.push('\n');
        }
        out
    }
}

/// Protocol of a port-protocol label such as `80/TCP` or `serve-80-tcp/TCP`
pub fn protocol_of(probe_key: &str) -> Option<Protocol> {
    probe_key.rsplit_once('/')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_probe::{Connectivity, Resources, Verdict};

    fn resources() -> Resources {
        Resources::new_default(
            &["x".to_string()],
            &["a".to_string(), "b".to_string()],
            &[80],
            &[Protocol::Tcp, Protocol::Udp],
            &[],
        )
        .unwrap()
    }

    fn uniform(resources: &Resources, connectivity: Connectivity) -> Probe {
        let mut probe = Probe::new(resources);
        for (from, to) in probe.table.keys().map(|(f, t)| (f.to_string(), t.to_string())).collect::<Vec<_>>() {
            let cell = probe.table.get_or_insert_with(&from, &to, Default::default);
            cell.insert("80/TCP".to_string(), Verdict::combined(connectivity));
            cell.insert("80/UDP".to_string(), Verdict::combined(connectivity));
        }
        probe
    }

    #[test]
    fn test_identical_probes_are_same() {
        let resources = resources();
        let expected = uniform(&resources, Connectivity::Allowed);
        let comparison = ComparisonTable::new(&expected, &expected.clone(), false);
        assert_eq!(
            comparison.counts(),
            ComparisonCounts {
                same: 8,
                different: 0,
                ignored: 0
            }
        );
        assert!(comparison.is_same());
    }

    #[test]
    fn test_loopback_ignored() {
        let resources = resources();
        let expected = uniform(&resources, Connectivity::Allowed);
        let mut actual = expected.clone();
        actual.table.get_or_insert_with("x/a", "x/a", Default::default).insert(
            "80/TCP".to_string(),
            Verdict::combined(Connectivity::Blocked),
        );

        let strict = ComparisonTable::new(&expected, &actual, false);
        assert_eq!(strict.counts().different, 1);
        let by_protocol = strict.counts_by_protocol();
        assert_eq!(by_protocol[&Protocol::Tcp].different, 1);
        assert_eq!(by_protocol[&Protocol::Udp].different, 0);

        let lenient = ComparisonTable::new(&expected, &actual, true);
        assert!(lenient.is_same());
        assert_eq!(lenient.counts().ignored, 4);
    }

    #[test]
    fn test_missing_verdict_is_different() {
        let resources = resources();
        let expected = uniform(&resources, Connectivity::Blocked);
        let actual = Probe::new(&resources);
        let comparison = ComparisonTable::new(&expected, &actual, false);
        assert_eq!(comparison.counts().different, 8);
        assert!(comparison.render().contains("80/UDP:"));
    }

    #[test]
    fn test_protocol_of() {
        assert_eq!(protocol_of("80/TCP"), Some(Protocol::Tcp));
        assert_eq!(protocol_of("serve-80-sctp/SCTP"), Some(Protocol::Sctp));
        assert_eq!(protocol_of("80"), None);
    }
}
