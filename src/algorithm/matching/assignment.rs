//! Greedy assignment of controls to treated units
//!
//! Every strategy reduces to a list of candidate edges (treated, control,
//! distance). Edges are ordered by distance, then control id, then treated
//! id; distances equal to within [`TIE_EPSILON`] fall through to the id
//! tie-break. Indices refer to units ordered by id, so index order is id
//! order.

use itertools::Itertools;
use rustc_hash::FxHashSet;

use super::types::UnmatchedReason;

/// Distances closer than this are treated as equal
pub const TIE_EPSILON: f64 = 1e-9;

/// A permissible pairing and its distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateEdge {
    pub treated: usize,
    pub control: usize,
    pub distance: f64,
}

impl CandidateEdge {
    #[must_use]
    pub const fn new(treated: usize, control: usize, distance: f64) -> Self {
        Self {
            treated,
            control,
            distance,
        }
    }
}

/// Whether two distances count as equal
#[must_use]
pub fn distances_tie(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_EPSILON
}

/// Sort edges into assignment order
///
/// Ascending distances are split into tie classes: a distance joins the
/// current class while it ties with the class's smallest distance. Classes
/// then order by control id and treated id, which keeps the order total.
pub fn order_edges(edges: &mut Vec<CandidateEdge>) {
    edges.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut class = 0usize;
    let mut anchor = edges.first().map_or(0.0, |e| e.distance);
    let mut keyed: Vec<(usize, CandidateEdge)> = Vec::with_capacity(edges.len());
    for edge in edges.drain(..) {
        if !distances_tie(anchor, edge.distance) {
            class += 1;
            anchor = edge.distance;
        }
        keyed.push((class, edge));
    }

    keyed.sort_by(|(class_a, a), (class_b, b)| {
        class_a
            .cmp(class_b)
            .then(a.control.cmp(&b.control))
            .then(a.treated.cmp(&b.treated))
    });
    edges.extend(keyed.into_iter().map(|(_, edge)| edge));
}

/// A chosen pairing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignedPair {
    pub treated: usize,
    pub control: usize,
    pub distance: f64,
    pub rank: usize,
}

/// Outcome of assigning controls to treated units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// Pairs ordered by treated index, then rank
    pub pairs: Vec<AssignedPair>,
    pub unmatched: Vec<(usize, UnmatchedReason)>,
    /// Treated units that got at least one but fewer than `ratio` controls
    pub short: Vec<(usize, usize)>,
}

/// Assign controls to treated units
///
/// # Arguments
///
/// * `treated` - All treated indices taking part in matching
/// * `edges` - Permissible pairings (already filtered by caliper or stratum)
/// * `ratio` - Controls wanted per treated unit
/// * `with_replacement` - Whether a control may serve several treated units
/// * `no_candidate` - Reason reported for treated units without any edge
#[must_use]
pub fn assign(
    treated: &[usize],
    mut edges: Vec<CandidateEdge>,
    ratio: usize,
    with_replacement: bool,
    no_candidate: UnmatchedReason,
) -> Assignment {
    edges.retain(|e| e.distance.is_finite());
    order_edges(&mut edges);

    let with_candidates: FxHashSet<usize> = edges.iter().map(|e| e.treated).collect();

    let mut chosen: Vec<AssignedPair> = if with_replacement {
        // Each treated unit independently takes its nearest controls
        edges
            .iter()
            .into_group_map_by(|e| e.treated)
            .into_values()
            .flat_map(|group| {
                group
                    .into_iter()
                    .take(ratio)
                    .enumerate()
                    .map(|(i, e)| AssignedPair {
                        treated: e.treated,
                        control: e.control,
                        distance: e.distance,
                        rank: i + 1,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        let mut used: FxHashSet<usize> = FxHashSet::default();
        let mut counts: Vec<usize> = vec![0; treated.iter().max().map_or(0, |m| m + 1)];
        let mut chosen = Vec::new();
        for edge in &edges {
            if edge.treated >= counts.len() || counts[edge.treated] >= ratio {
                continue;
            }
            if !used.insert(edge.control) {
                continue;
            }
            counts[edge.treated] += 1;
            chosen.push(AssignedPair {
                treated: edge.treated,
                control: edge.control,
                distance: edge.distance,
                rank: counts[edge.treated],
            });
        }
        chosen
    };
    chosen.sort_by(|a, b| a.treated.cmp(&b.treated).then(a.rank.cmp(&b.rank)));

    let mut unmatched = Vec::new();
    let mut short = Vec::new();
    for &t in treated {
        let matched = chosen.iter().filter(|p| p.treated == t).count();
        if matched == 0 {
            let reason = if with_candidates.contains(&t) {
                UnmatchedReason::ControlsExhausted
            } else {
                no_candidate
            };
            unmatched.push((t, reason));
        } else if matched < ratio {
            short.push((t, matched));
        }
    }

    Assignment {
        pairs: chosen,
        unmatched,
        short,
    }
}
