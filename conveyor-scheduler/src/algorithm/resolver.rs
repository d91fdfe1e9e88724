//! Passed-constraint resolution
//!
//! Given the candidates of every input of a job, finds one version per input
//! such that, for every upstream job named in a `passed` constraint, a single
//! succeeded build of that job passed on the chosen version of every input
//! naming it. Two inputs both constrained by `passed: [build-image]` must come
//! out of the *same* build of `build-image`.
//!
//! Inputs that share no upstream job are independent and solved separately.
//! Within a connected group the search walks per-input cursors from the most
//! recent candidate, advancing the laggard on rejection. If that walk runs an
//! input dry, a backtracking search over the same candidates decides the group,
//! so combinations the greedy walk stepped past are still found. Both phases
//! share an iteration limit per group.

use std::collections::{BTreeMap, BTreeSet};

use conveyor_core::domain::build::BuildId;
use conveyor_core::domain::job::JobId;
use conveyor_core::domain::resource::ResourceVersion;
use tracing::{debug, warn};

use super::candidates::InputCandidates;
use super::versions_db::VersionsDB;

/// Default per-group iteration limit
pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

/// One job input as seen by the resolver
#[derive(Debug, Clone)]
pub struct ResolverInput {
    pub candidates: InputCandidates,
    /// Upstream jobs the chosen version must have passed through
    pub passed: BTreeSet<JobId>,
}

/// The version chosen for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub input_name: String,
    pub version: ResourceVersion,
}

enum Search {
    Found(Vec<ResourceVersion>),
    Exhausted,
    OverLimit,
}

/// A group of inputs tied together by shared upstream jobs
struct Group<'a> {
    /// Indexes into the resolver's input slice, ascending
    members: Vec<usize>,
    /// Narrowed candidates, parallel to `members`
    candidates: Vec<Vec<ResourceVersion>>,
    /// Upstream job -> positions (into `members`) of the inputs naming it
    constraints: BTreeMap<JobId, Vec<usize>>,
    db: &'a VersionsDB,
}

/// Resolves a job's inputs against one snapshot
pub struct Resolver<'a> {
    db: &'a VersionsDB,
    max_iterations: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a VersionsDB) -> Self {
        Self {
            db,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Caps the work spent on one group of mutually constrained inputs
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Resolves one version per input, in input order
    ///
    /// Returns `None` when any group has no satisfying assignment or its
    /// search hit the iteration limit. A job's mapping is all-or-nothing.
    pub fn resolve(&self, inputs: &[ResolverInput]) -> Option<Vec<ResolvedVersion>> {
        let mut chosen: Vec<Option<ResourceVersion>> = vec![None; inputs.len()];

        for group in self.groups(inputs) {
            match group.solve(self.max_iterations) {
                Search::Found(picks) => {
                    for (&member, pick) in group.members.iter().zip(picks) {
                        chosen[member] = Some(pick);
                    }
                }
                Search::Exhausted => {
                    debug!(
                        "No satisfying versions for input(s) {}",
                        group.describe(inputs)
                    );
                    return None;
                }
                Search::OverLimit => {
                    warn!(
                        "Version search for input(s) {} exceeded {} iterations",
                        group.describe(inputs),
                        self.max_iterations
                    );
                    return None;
                }
            }
        }

        inputs
            .iter()
            .zip(chosen)
            .map(|(input, version)| {
                version.map(|version| ResolvedVersion {
                    input_name: input.candidates.input_name.clone(),
                    version,
                })
            })
            .collect()
    }

    /// Partitions inputs into connected components over shared upstream jobs
    fn groups(&self, inputs: &[ResolverInput]) -> Vec<Group<'a>> {
        let mut parent: Vec<usize> = (0..inputs.len()).collect();
        let mut first_naming: BTreeMap<JobId, usize> = BTreeMap::new();

        for (index, input) in inputs.iter().enumerate() {
            for job in &input.passed {
                match first_naming.get(job) {
                    Some(&other) => union(&mut parent, index, other),
                    None => {
                        first_naming.insert(*job, index);
                    }
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..inputs.len() {
            let root = find(&mut parent, index);
            components.entry(root).or_default().push(index);
        }

        let mut groups: Vec<Group<'a>> = components
            .into_values()
            .map(|members| Group::new(self.db, inputs, members))
            .collect();
        groups.sort_by_key(|group| group.members[0]);
        groups
    }
}

impl<'a> Group<'a> {
    fn new(db: &'a VersionsDB, inputs: &[ResolverInput], members: Vec<usize>) -> Self {
        let mut constraints: BTreeMap<JobId, Vec<usize>> = BTreeMap::new();
        let mut candidates = Vec::with_capacity(members.len());

        for (position, &member) in members.iter().enumerate() {
            let input = &inputs[member];
            for job in &input.passed {
                constraints.entry(*job).or_default().push(position);
            }

            // a version that never went through a named job can't satisfy it
            let narrowed = input
                .candidates
                .versions
                .iter()
                .filter(|version| {
                    input
                        .passed
                        .iter()
                        .all(|job| db.passed_through(*job, version.resource_id, version.version_id))
                })
                .copied()
                .collect();
            candidates.push(narrowed);
        }

        Self {
            members,
            candidates,
            constraints,
            db,
        }
    }

    fn describe(&self, inputs: &[ResolverInput]) -> String {
        self.members
            .iter()
            .map(|&member| inputs[member].candidates.input_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn solve(&self, max_iterations: usize) -> Search {
        if self.candidates.iter().any(Vec::is_empty) {
            return Search::Exhausted;
        }

        if self.constraints.is_empty() {
            return Search::Found(self.candidates.iter().map(|c| c[0]).collect());
        }

        let mut iterations = 0;
        match self.advance_laggards(&mut iterations, max_iterations) {
            Search::Exhausted => {}
            outcome => return outcome,
        }

        let mut assigned = vec![None; self.members.len()];
        self.backtrack(0, &mut assigned, &mut iterations, max_iterations)
    }

    /// Greedy walk from the most recent tuple
    ///
    /// On rejection the input with the oldest pick among those in a failing
    /// constraint moves to its next candidate; ties move the later-declared
    /// input so earlier inputs keep their most recent versions.
    fn advance_laggards(&self, iterations: &mut usize, max_iterations: usize) -> Search {
        let mut cursors = vec![0usize; self.members.len()];

        loop {
            if *iterations >= max_iterations {
                return Search::OverLimit;
            }
            *iterations += 1;

            let picks: Vec<ResourceVersion> = cursors
                .iter()
                .zip(&self.candidates)
                .map(|(&cursor, candidates)| candidates[cursor])
                .collect();

            let failing: BTreeSet<usize> = self
                .constraints
                .iter()
                .filter(|(job, positions)| !self.covered(**job, positions, |p| Some(picks[p])))
                .flat_map(|(_, positions)| positions.iter().copied())
                .collect();

            let Some(laggard) = failing.into_iter().min_by(|&a, &b| {
                picks[a]
                    .check_order
                    .cmp(&picks[b].check_order)
                    .then(b.cmp(&a))
            }) else {
                return Search::Found(picks);
            };

            cursors[laggard] += 1;
            if cursors[laggard] >= self.candidates[laggard].len() {
                return Search::Exhausted;
            }
        }
    }

    /// Exhaustive search in declared input order, most recent candidates first
    fn backtrack(
        &self,
        position: usize,
        assigned: &mut Vec<Option<ResourceVersion>>,
        iterations: &mut usize,
        max_iterations: usize,
    ) -> Search {
        for &candidate in &self.candidates[position] {
            if *iterations >= max_iterations {
                return Search::OverLimit;
            }
            *iterations += 1;

            assigned[position] = Some(candidate);

            // only constraints naming this input can have changed
            let consistent = self
                .constraints
                .iter()
                .filter(|(_, positions)| positions.contains(&position))
                .all(|(job, positions)| self.covered(*job, positions, |p| assigned[p]));
            if !consistent {
                continue;
            }

            if position + 1 == self.members.len() {
                return Search::Found(assigned.iter().flatten().copied().collect());
            }

            match self.backtrack(position + 1, assigned, iterations, max_iterations) {
                Search::Exhausted => continue,
                outcome => return outcome,
            }
        }

        assigned[position] = None;
        Search::Exhausted
    }

    /// Whether one build of `job` passed on every assigned pick among `positions`
    fn covered(
        &self,
        job: JobId,
        positions: &[usize],
        pick: impl Fn(usize) -> Option<ResourceVersion>,
    ) -> bool {
        let mut common: Option<BTreeSet<BuildId>> = None;

        for &position in positions {
            let Some(version) = pick(position) else {
                continue;
            };
            let builds = self
                .db
                .builds_with_output(job, version.resource_id, version.version_id);

            let next = match common {
                None => builds.clone(),
                Some(common) => common.intersection(builds).copied().collect(),
            };
            if next.is_empty() {
                return false;
            }
            common = Some(next);
        }

        true
    }
}

fn find(parent: &mut [usize], index: usize) -> usize {
    let mut root = index;
    while parent[root] != root {
        root = parent[root];
    }
    let mut current = index;
    while parent[current] != root {
        let next = parent[current];
        parent[current] = root;
        current = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let a = find(parent, a);
    let b = find(parent, b);
    if a != b {
        parent[a.max(b)] = a.min(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::candidates::candidates;
    use conveyor_core::domain::build::BuildOutput;
    use conveyor_core::domain::resource::{ResourceId, VersionId};

    const A: ResourceId = 1;
    const B: ResourceId = 2;
    const C: ResourceId = 3;
    const J: JobId = 10;
    const J2: JobId = 20;

    fn output(job_id: JobId, build_id: BuildId, resource_id: ResourceId, version_id: VersionId) -> BuildOutput {
        BuildOutput {
            job_id,
            build_id,
            resource_id,
            version_id,
        }
    }

    fn input(db: &VersionsDB, name: &str, resource_id: ResourceId, passed: &[JobId]) -> ResolverInput {
        ResolverInput {
            candidates: InputCandidates {
                input_name: name.to_string(),
                resource_id,
                versions: candidates(db, resource_id, None),
            },
            passed: passed.iter().copied().collect(),
        }
    }

    fn picked(resolved: &[ResolvedVersion]) -> Vec<(String, VersionId)> {
        resolved
            .iter()
            .map(|r| (r.input_name.clone(), r.version.version_id))
            .collect()
    }

    fn pair(a: VersionId, b: VersionId) -> Vec<(String, VersionId)> {
        vec![("a".to_string(), a), ("b".to_string(), b)]
    }

    #[test]
    fn test_unconstrained_inputs_pick_latest() {
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 1, 1))
            .version(ResourceVersion::new(A, 2, 2))
            .version(ResourceVersion::new(B, 5, 1))
            .build();

        let inputs = vec![input(&db, "a", A, &[]), input(&db, "b", B, &[])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(2, 5));
    }

    #[test]
    fn test_shared_passed_job_never_mixes_builds() {
        // build 1 consumed a1+b1, build 2 consumed a2+b2; a3 never went through J
        let db = VersionsDB::builder(1)
            .versions((1..=3).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=2).map(|v| ResourceVersion::new(B, v, v)))
            .build_outputs([
                output(J, 1, A, 1),
                output(J, 1, B, 1),
                output(J, 2, A, 2),
                output(J, 2, B, 2),
            ])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(2, 2));
    }

    #[test]
    fn test_cross_pair_is_rejected_when_only_mixed_versions_are_latest() {
        // b2 only went through build 3 alongside a1, so (a2, b2) is invalid
        let db = VersionsDB::builder(1)
            .versions((1..=2).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=2).map(|v| ResourceVersion::new(B, v, v)))
            .build_outputs([
                output(J, 1, A, 1),
                output(J, 1, B, 1),
                output(J, 2, A, 2),
                output(J, 2, B, 1),
                output(J, 3, A, 1),
                output(J, 3, B, 2),
            ])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();
        let result = picked(&resolved);

        assert_ne!(result, pair(2, 2));
        assert!(result == pair(2, 1) || result == pair(1, 2));
    }

    #[test]
    fn test_prefers_most_recent_joint_build() {
        let db = VersionsDB::builder(1)
            .versions((1..=3).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=3).map(|v| ResourceVersion::new(B, v, v)))
            .build_outputs((1..=3).flat_map(|v| [output(J, v, A, v), output(J, v, B, v)]))
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(3, 3));
    }

    #[test]
    fn test_laggard_advances_first() {
        // a's check orders dwarf b's, so b is the laggard on rejection
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 99, 99))
            .version(ResourceVersion::new(A, 100, 100))
            .version(ResourceVersion::new(B, 1, 1))
            .version(ResourceVersion::new(B, 2, 2))
            .build_outputs([
                output(J, 1, A, 100),
                output(J, 1, B, 1),
                output(J, 2, A, 99),
                output(J, 2, B, 2),
            ])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(100, 1));
    }

    #[test]
    fn test_falls_back_when_greedy_walk_runs_dry() {
        // the laggard b has a single candidate, so the greedy walk gives up on
        // (a2, b2); a1 went through the same build as b2
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 1, 10))
            .version(ResourceVersion::new(A, 2, 20))
            .version(ResourceVersion::new(B, 2, 2))
            .version(ResourceVersion::new(B, 3, 3).with_enabled(false))
            .build_outputs([
                output(J, 1, A, 1),
                output(J, 1, B, 2),
                output(J, 2, A, 2),
                output(J, 2, B, 3),
            ])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(1, 2));
    }

    #[test]
    fn test_iteration_limit_reports_unsatisfiable() {
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 1, 10))
            .version(ResourceVersion::new(A, 2, 20))
            .version(ResourceVersion::new(B, 2, 2))
            .build_outputs([
                output(J, 1, A, 1),
                output(J, 1, B, 2),
                output(J, 2, A, 2),
            ])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];

        assert!(Resolver::new(&db).with_max_iterations(1).resolve(&inputs).is_none());
        assert!(Resolver::new(&db).with_max_iterations(10).resolve(&inputs).is_some());
    }

    #[test]
    fn test_no_upstream_builds_is_unsatisfiable() {
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 1, 1))
            .version(ResourceVersion::new(B, 1, 1))
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        assert!(Resolver::new(&db).resolve(&inputs).is_none());
    }

    #[test]
    fn test_unsatisfiable_group_fails_whole_job() {
        let db = VersionsDB::builder(1)
            .version(ResourceVersion::new(A, 1, 1))
            .version(ResourceVersion::new(B, 1, 1))
            .build();

        // a is free, b requires an upstream that never ran
        let inputs = vec![input(&db, "a", A, &[]), input(&db, "b", B, &[J])];
        assert!(Resolver::new(&db).resolve(&inputs).is_none());
    }

    #[test]
    fn test_chained_constraints_form_one_group() {
        // a -J- b -J2- c: b only passed J2 at version 1, which drags a back to 1
        let db = VersionsDB::builder(1)
            .versions((1..=2).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=2).map(|v| ResourceVersion::new(B, v, v)))
            .versions((1..=2).map(|v| ResourceVersion::new(C, v, v)))
            .build_outputs([
                output(J, 1, A, 1),
                output(J, 1, B, 1),
                output(J, 2, A, 2),
                output(J, 2, B, 2),
                output(J2, 3, B, 1),
                output(J2, 3, C, 1),
            ])
            .build();

        let inputs = vec![
            input(&db, "a", A, &[J]),
            input(&db, "b", B, &[J, J2]),
            input(&db, "c", C, &[J2]),
        ];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(
            picked(&resolved),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("c".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_independent_groups_do_not_constrain_each_other() {
        let db = VersionsDB::builder(1)
            .versions((1..=2).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=2).map(|v| ResourceVersion::new(B, v, v)))
            .build_outputs([output(J, 1, A, 1), output(J2, 2, B, 2)])
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J2])];
        let resolved = Resolver::new(&db).resolve(&inputs).unwrap();

        assert_eq!(picked(&resolved), pair(1, 2));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let db = VersionsDB::builder(1)
            .versions((1..=5).map(|v| ResourceVersion::new(A, v, v)))
            .versions((1..=5).map(|v| ResourceVersion::new(B, v, v * 3)))
            .build_outputs((1..=5).flat_map(|v| [output(J, v, A, v), output(J, v, B, 6 - v)]))
            .build();

        let inputs = vec![input(&db, "a", A, &[J]), input(&db, "b", B, &[J])];
        let resolver = Resolver::new(&db);

        assert_eq!(resolver.resolve(&inputs), resolver.resolve(&inputs));
    }

    #[test]
    fn test_union_find_groups_by_lowest_index() {
        let mut parent: Vec<usize> = (0..4).collect();
        union(&mut parent, 3, 1);
        union(&mut parent, 1, 2);

        assert_eq!(find(&mut parent, 3), 1);
        assert_eq!(find(&mut parent, 2), 1);
        assert_eq!(find(&mut parent, 0), 0);
    }
}
