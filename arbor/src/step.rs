//! One engine iteration: `step(snapshot) -> {exit, snapshot}`.
//!
//! The step function is independent of any loop primitive. It takes a
//! snapshot by value, consults collaborators, and returns the updated
//! snapshot plus whether the driver should stop. On error the input snapshot
//! is consumed and nothing is returned, so a driver that keeps the persisted
//! copy simply retries or aborts from the previous state.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{Collaborators, Evaluator, GenerateRequest, Generator};
use crate::core::dnc::{
    AdvanceReason, advance, apply_rescue, attach_children, derive_statuses, mark_depth_limited,
    record_verdict,
};
use crate::core::error::EngineError;
use crate::core::graph::TaskGraph;
use crate::core::search::{
    DfsMove, ThoughtTree, add_score, answer_path, backtrack_from, best_at_depth, dfs_next,
    live_at_depth, retain_top, tally_votes, value_score,
};
use crate::core::snapshot::{RunParams, Snapshot, Structure};
use crate::core::tree::TaskTree;
use crate::core::types::{
    Candidate, Classification, NodeId, PhaseLabel, RunOutcome, ScoringMode, SearchType, Status,
};

/// Result of one iteration.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub exit: bool,
    pub snapshot: Snapshot,
    pub report: StepReport,
}

/// What one iteration did, for logs and CLI output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// 1-indexed iteration number within the session.
    pub iteration: u32,
    pub structure: &'static str,
    /// Node the iteration worked on (cursor, or first frontier node).
    pub focus: Option<NodeId>,
    /// Nodes created during the iteration.
    pub created: Vec<NodeId>,
    pub exit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

/// Per-variant effect, folded into the [`StepReport`].
struct Progress {
    focus: Option<NodeId>,
    created: Vec<NodeId>,
    outcome: Option<RunOutcome>,
}

/// Run one iteration over `snapshot`.
///
/// A snapshot that already carries an outcome is returned unchanged with
/// `exit = true`. Hitting `max_steps` records `budget_exhausted`.
#[instrument(skip_all, fields(session = %snapshot.session_id, structure = snapshot.structure.name()))]
pub fn step<C: Collaborators>(mut snapshot: Snapshot, collab: &C) -> Result<StepOutcome> {
    if let Some(outcome) = snapshot.outcome.clone() {
        debug!(outcome = outcome.label(), "session already finished");
        let report = StepReport {
            iteration: snapshot.steps_taken,
            structure: snapshot.structure.name(),
            focus: None,
            created: Vec::new(),
            exit: true,
            outcome: Some(outcome),
        };
        return Ok(StepOutcome {
            exit: true,
            snapshot,
            report,
        });
    }

    if snapshot.steps_taken >= snapshot.params.max_steps {
        warn!(max_steps = snapshot.params.max_steps, "step budget exhausted");
        snapshot.outcome = Some(RunOutcome::BudgetExhausted);
        let report = StepReport {
            iteration: snapshot.steps_taken,
            structure: snapshot.structure.name(),
            focus: None,
            created: Vec::new(),
            exit: true,
            outcome: snapshot.outcome.clone(),
        };
        return Ok(StepOutcome {
            exit: true,
            snapshot,
            report,
        });
    }

    let iteration = snapshot.steps_taken + 1;
    let params = snapshot.params.clone();
    let progress = match &mut snapshot.structure {
        Structure::Dnc { tree } => dnc_step(tree, &params, collab).context("dnc step")?,
        Structure::Search { tree, depth } => match params.search_type {
            SearchType::Bfs => bfs_step(tree, depth, &params, collab).context("bfs step")?,
            SearchType::Dfs => dfs_step(tree, &params, collab).context("dfs step")?,
        },
        Structure::Graph { graph } => graph_step(graph, &params, collab).context("graph step")?,
    };

    snapshot.steps_taken = iteration;
    let exit = progress.outcome.is_some();
    if let Some(outcome) = &progress.outcome {
        info!(iteration, outcome = outcome.label(), "session finished");
    }
    snapshot.outcome = progress.outcome.clone();

    let report = StepReport {
        iteration,
        structure: snapshot.structure.name(),
        focus: progress.focus,
        created: progress.created,
        exit,
        outcome: progress.outcome,
    };
    debug!(iteration, exit, created = report.created.len(), "step complete");
    Ok(StepOutcome {
        exit,
        snapshot,
        report,
    })
}

/// Conquer the cursor, divide it if needed, then move the cursor.
fn dnc_step<C: Collaborators>(tree: &mut TaskTree, params: &RunParams, collab: &C) -> Result<Progress> {
    let id = tree.cursor();
    tree.get_mut(id)?.status = Status::Running;

    let verdict = collab.conquer(tree.get(id)?).context("conquer")?;
    debug!(node = id, classification = ?verdict.classification, "conquered");
    record_verdict(tree, id, &verdict)?;

    let mut created = Vec::new();
    if verdict.classification == Classification::Complex {
        if tree.depth(id)? < params.max_depth {
            let specs = collab.divide(tree.get(id)?).context("divide")?;
            created = attach_children(tree, id, &specs)?;
            debug!(node = id, children = created.len(), "divided");
        } else {
            warn!(node = id, max_depth = params.max_depth, "complex node at depth limit");
            mark_depth_limited(tree, id, params.max_depth)?;
        }
    }

    if tree.get(id)?.status == Status::Failed {
        let rescued = collab.rescue(tree.get(id)?).context("rescue")?;
        apply_rescue(tree, id, rescued)?;
    }

    derive_statuses(tree)?;
    let advanced = advance(tree, params.sibling_lookup)?;
    let outcome = match advanced.reason {
        AdvanceReason::Failed => Some(RunOutcome::Failed { node_id: id }),
        AdvanceReason::Completed => Some(RunOutcome::Completed),
        AdvanceReason::Descended | AdvanceReason::NextSibling | AdvanceReason::Climbed => None,
    };
    Ok(Progress {
        focus: Some(id),
        created,
        outcome,
    })
}

/// Ask the generator for up to `count` candidates and reject blank ones.
fn generate_candidates<G: Generator>(collab: &G, request: &GenerateRequest<'_>) -> Result<Vec<Candidate>> {
    let mut candidates = collab.generate(request).context("generate")?;
    if let Some(blank) = candidates.iter().position(|c| c.task.trim().is_empty()) {
        return Err(EngineError::InvalidGeneration(format!("candidate {blank} has an empty task")).into());
    }
    candidates.truncate(request.count);
    Ok(candidates)
}

/// Score value-mode contents: `n_evaluate` labels each, summed by weight.
fn value_scores<E: Evaluator>(collab: &E, contents: &[String], params: &RunParams) -> Result<Vec<f64>> {
    let mut scores = Vec::with_capacity(contents.len());
    for content in contents {
        let mut labels = Vec::with_capacity(params.n_evaluate);
        for _ in 0..params.n_evaluate {
            labels.push(collab.value(content).context("evaluate value")?);
        }
        scores.push(value_score(&labels, &params.value_weights));
    }
    Ok(scores)
}

/// Run `n_evaluate` vote rounds over `contents`; one point per win.
fn vote_scores<E: Evaluator>(collab: &E, contents: &[String], params: &RunParams) -> Result<Vec<f64>> {
    let mut choices = Vec::with_capacity(params.n_evaluate);
    for _ in 0..params.n_evaluate {
        choices.push(collab.vote(contents).context("evaluate vote")?);
    }
    Ok(tally_votes(&choices, contents.len())?)
}

fn score_contents<E: Evaluator>(collab: &E, contents: &[String], params: &RunParams) -> Result<Vec<f64>> {
    if contents.is_empty() {
        return Ok(Vec::new());
    }
    match params.scoring {
        ScoringMode::Value => value_scores(collab, contents, params),
        ScoringMode::Vote => vote_scores(collab, contents, params),
    }
}

fn score_thoughts<E: Evaluator>(
    tree: &mut ThoughtTree,
    ids: &[NodeId],
    params: &RunParams,
    collab: &E,
) -> Result<()> {
    let mut contents = Vec::with_capacity(ids.len());
    for id in ids {
        contents.push(tree.get(*id)?.content.clone());
    }
    let scores = score_contents(collab, &contents, params)?;
    for (id, score) in ids.iter().zip(scores) {
        add_score(tree, *id, score)?;
    }
    Ok(())
}

fn solved_at_depth(tree: &ThoughtTree, depth: u32) -> Result<RunOutcome> {
    Ok(match best_at_depth(tree, depth)? {
        Some(best) => RunOutcome::Solved {
            answer_path: answer_path(tree, best)?,
        },
        None => RunOutcome::Exhausted,
    })
}

/// Expand every live node at the current depth, score the new level and keep
/// the best `beam_width` of it.
fn bfs_step<C: Collaborators>(
    tree: &mut ThoughtTree,
    depth: &mut u32,
    params: &RunParams,
    collab: &C,
) -> Result<Progress> {
    if *depth >= params.max_depth {
        return Ok(Progress {
            focus: None,
            created: Vec::new(),
            outcome: Some(solved_at_depth(tree, *depth)?),
        });
    }

    let level = live_at_depth(tree, *depth);
    let mut created = Vec::new();
    for &id in &level {
        let node = tree.get(id)?.clone();
        let candidates = generate_candidates(
            collab,
            &GenerateRequest {
                task: &node.task,
                content: &node.content,
                phase: None,
                count: params.n_generate,
            },
        )?;
        created.extend(tree.add_subtasks(id, candidates.into_iter().map(|c| c.task))?);
        tree.get_mut(id)?.status = Status::Success;
    }

    if created.is_empty() {
        warn!(depth = *depth, "generator produced no candidates for the level");
        return Ok(Progress {
            focus: level.first().copied(),
            created,
            outcome: Some(RunOutcome::Exhausted),
        });
    }

    score_thoughts(tree, &created, params, collab)?;
    let kept = retain_top(tree, &created, params.beam_width)?;
    *depth += 1;
    info!(depth = *depth, generated = created.len(), kept = kept.len(), "level retained");

    let outcome = if *depth >= params.max_depth {
        Some(solved_at_depth(tree, *depth)?)
    } else {
        None
    };
    Ok(Progress {
        focus: level.first().copied(),
        created,
        outcome,
    })
}

/// Evaluate the cursor alone, then prune/backtrack, expand or descend.
fn dfs_step<C: Collaborators>(tree: &mut ThoughtTree, params: &RunParams, collab: &C) -> Result<Progress> {
    let id = tree.cursor();
    if !tree.get(id)?.evaluated {
        evaluate_cursor(tree, id, params, collab)?;
    }

    let mut created = Vec::new();
    let mut next = dfs_next(tree, params.prune_threshold, params.max_depth)?;
    if let DfsMove::Expand(parent) = next {
        let node = tree.get(parent)?.clone();
        let candidates = generate_candidates(
            collab,
            &GenerateRequest {
                task: &node.task,
                content: &node.content,
                phase: None,
                count: params.n_generate,
            },
        )?;
        tree.get_mut(parent)?.status = Status::Success;
        if candidates.is_empty() {
            debug!(node = parent, "dead end; backtracking");
            next = backtrack_from(tree, parent)?;
        } else {
            created = tree.add_subtasks(parent, candidates.into_iter().map(|c| c.task))?;
            next = dfs_next(tree, params.prune_threshold, params.max_depth)?;
        }
    }
    debug!(node = id, ?next, "dfs move");

    let outcome = match next {
        DfsMove::Solved(best) => Some(RunOutcome::Solved {
            answer_path: answer_path(tree, best)?,
        }),
        DfsMove::Exhausted => Some(RunOutcome::Exhausted),
        DfsMove::Descend(_) | DfsMove::Expand(_) | DfsMove::Backtracked(_) => None,
    };
    Ok(Progress {
        focus: Some(id),
        created,
        outcome,
    })
}

/// Value mode rates the cursor alone; vote mode lets the cursor compete with
/// its live siblings, credits whoever wins each round and marks the whole pool
/// evaluated.
fn evaluate_cursor<E: Evaluator>(tree: &mut ThoughtTree, id: NodeId, params: &RunParams, collab: &E) -> Result<()> {
    match params.scoring {
        ScoringMode::Value => score_thoughts(tree, &[id], params, collab),
        ScoringMode::Vote => {
            let mut pool: Vec<NodeId> = tree
                .siblings(id)?
                .into_iter()
                .filter(|node| node.is_live())
                .map(|node| node.id)
                .collect();
            pool.push(id);
            pool.sort_unstable();
            let mut contents = Vec::with_capacity(pool.len());
            for pool_id in &pool {
                contents.push(tree.get(*pool_id)?.content.clone());
            }
            let tally = vote_scores(collab, &contents, params)?;
            for (pool_id, votes) in pool.iter().zip(tally) {
                add_score(tree, *pool_id, votes)?;
            }
            Ok(())
        }
    }
}

/// Score the frontier, check the exit condition, then run the phase's
/// operation and move to the next phase.
fn graph_step<C: Collaborators>(graph: &mut TaskGraph, params: &RunParams, collab: &C) -> Result<Progress> {
    let mut unscored = Vec::new();
    for id in graph.executable_leaves()? {
        if !graph.get(id)?.scored {
            unscored.push(id);
        }
    }
    let mut contents = Vec::with_capacity(unscored.len());
    for id in &unscored {
        contents.push(graph.get(*id)?.content.text());
    }
    let scores = score_contents(collab, &contents, params)?;
    for (id, score) in unscored.iter().zip(scores) {
        graph.set_score(*id, score)?;
    }

    let focus = graph.leaves().first().copied();
    if graph.should_exit() {
        return Ok(Progress {
            focus,
            created: Vec::new(),
            outcome: Some(solved_graph(graph)?),
        });
    }

    let label = graph.phase_label();
    let mut created = Vec::new();
    match label {
        PhaseLabel::Generate => {
            for leaf in graph.executable_leaves()? {
                let node = graph.get(leaf)?.clone();
                let content = node.content.text();
                let candidates = generate_candidates(
                    collab,
                    &GenerateRequest {
                        task: &node.task,
                        content: &content,
                        phase: Some(label),
                        count: params.n_generate,
                    },
                )?;
                created.extend(graph.expand_leaf(leaf, &candidates)?);
                graph.get_mut(leaf)?.status = Status::Success;
            }
        }
        PhaseLabel::Reduce => {
            created = graph.reduce_best_n(params.best_n, params.higher_is_better)?;
            mark_retained(graph, &created)?;
        }
        PhaseLabel::Refine => {
            created.extend(graph.collapse_best_n(params.best_n, params.higher_is_better)?);
            mark_retained(graph, &created)?;
        }
    }
    graph.advance_phase();
    info!(phase = graph.phase(), ?label, created = created.len(), leaves = graph.leaves().len(), "phase complete");

    let outcome = if graph.leaves().is_empty() {
        Some(RunOutcome::Exhausted)
    } else if graph.should_exit() {
        Some(solved_graph(graph)?)
    } else {
        None
    };
    Ok(Progress {
        focus,
        created,
        outcome,
    })
}

/// Inputs kept by a reduction are done.
fn mark_retained(graph: &mut TaskGraph, merged: &[NodeId]) -> Result<()> {
    for id in merged {
        let retained: Vec<NodeId> = graph.get(*id)?.predecessors.iter().copied().collect();
        for pred in retained {
            graph.get_mut(pred)?.status = Status::Success;
        }
    }
    Ok(())
}

fn solved_graph(graph: &TaskGraph) -> Result<RunOutcome> {
    let leaves = graph.leaves();
    let Some(&leaf) = leaves.first() else {
        return Ok(RunOutcome::Exhausted);
    };
    Ok(RunOutcome::Solved {
        answer_path: graph.lineage(leaf)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::Mode;
    use crate::core::types::ValueLabel;
    use crate::test_support::{ScriptedCollaborators, candidates, children, verdict};

    #[test]
    fn finished_snapshot_is_returned_unchanged() {
        let mut snapshot = Snapshot::seed("s", Mode::Dnc, "root", RunParams::default());
        snapshot.outcome = Some(RunOutcome::Completed);
        let collab = ScriptedCollaborators::default();

        let out = step(snapshot.clone(), &collab).expect("step");
        assert!(out.exit);
        assert_eq!(out.snapshot, snapshot);
    }

    #[test]
    fn max_steps_records_budget_exhaustion() {
        let params = RunParams {
            max_steps: 1,
            ..RunParams::default()
        };
        let mut snapshot = Snapshot::seed("s", Mode::Dnc, "root", params);
        snapshot.steps_taken = 1;
        let out = step(snapshot, &ScriptedCollaborators::default()).expect("step");
        assert!(out.exit);
        assert_eq!(out.snapshot.outcome, Some(RunOutcome::BudgetExhausted));
    }

    #[test]
    fn simple_root_completes_in_one_step() {
        let snapshot = Snapshot::seed("s", Mode::Dnc, "root", RunParams::default());
        let collab = ScriptedCollaborators::default().with_verdicts([verdict(Classification::Simple)]);

        let out = step(snapshot, &collab).expect("step");
        assert!(out.exit);
        assert_eq!(out.snapshot.outcome, Some(RunOutcome::Completed));
        assert_eq!(out.report.iteration, 1);
    }

    #[test]
    fn complex_at_depth_limit_fails_without_rescue() {
        let params = RunParams {
            max_depth: 1,
            ..RunParams::default()
        };
        let snapshot = Snapshot::seed("s", Mode::Dnc, "root", params);
        let collab = ScriptedCollaborators::default().with_verdicts([verdict(Classification::Complex)]);

        let out = step(snapshot, &collab).expect("step");
        assert_eq!(out.snapshot.outcome, Some(RunOutcome::Failed { node_id: 0 }));
        assert_eq!(collab.divisions_requested(), 0);
    }

    #[test]
    fn collaborator_error_aborts_iteration() {
        let snapshot = Snapshot::seed("s", Mode::Dnc, "root", RunParams::default());
        let err = step(snapshot, &ScriptedCollaborators::default()).expect_err("no verdict scripted");
        assert!(format!("{err:#}").contains("conquer"));
    }

    #[test]
    fn invalid_division_is_reported_as_invalid_generation() {
        let snapshot = Snapshot::seed("s", Mode::Dnc, "root", RunParams::default());
        let collab = ScriptedCollaborators::default()
            .with_verdicts([verdict(Classification::Complex)])
            .with_divisions([children(&["ok", " "])]);
        let err = step(snapshot, &collab).expect_err("blank child");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidGeneration(_))
        ));
    }

    #[test]
    fn bfs_step_generates_scores_and_retains_beam() {
        let params = RunParams {
            search_type: SearchType::Bfs,
            beam_width: 1,
            n_generate: 2,
            n_evaluate: 1,
            max_depth: 3,
            ..RunParams::default()
        };
        let snapshot = Snapshot::seed("s", Mode::Search, "root", params);
        let collab = ScriptedCollaborators::default()
            .with_candidates([candidates(&["a", "b", "ignored"])])
            .with_labels([ValueLabel::Likely, ValueLabel::Sure]);

        let out = step(snapshot, &collab).expect("step");
        assert!(!out.exit);
        assert_eq!(out.report.created, vec![1, 2]);
        let Structure::Search { tree, depth } = &out.snapshot.structure else {
            panic!("expected search structure");
        };
        assert_eq!(*depth, 2);
        assert!(tree.get(1).expect("a").pruned);
        assert!(!tree.get(2).expect("b").pruned);
    }
}
