//! Test-only collaborators that replay scripted answers.
//!
//! Each collaborator pops the next answer from its queue. An empty queue is an
//! error for `conquer`, `divide`, `value` and `vote`. An empty rescue queue
//! means "leave the failure in place", and an empty candidate queue means the
//! generator proposes nothing.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::collaborators::{Conqueror, Divider, Evaluator, GenerateRequest, Generator, Rescuer};
use crate::core::tree::TaskNode;
use crate::core::types::{Candidate, ChildSpec, Classification, Status, ValueLabel, Verdict};

/// Scripted implementation of every collaborator trait.
#[derive(Debug, Default)]
pub struct ScriptedCollaborators {
    verdicts: RefCell<VecDeque<Verdict>>,
    divisions: RefCell<VecDeque<Vec<ChildSpec>>>,
    rescues: RefCell<VecDeque<Option<Status>>>,
    labels: RefCell<VecDeque<ValueLabel>>,
    votes: RefCell<VecDeque<usize>>,
    candidates: RefCell<VecDeque<Vec<Candidate>>>,
    divide_calls: Cell<usize>,
    generate_requests: RefCell<Vec<(String, usize)>>,
    conquered: RefCell<Vec<String>>,
}

impl ScriptedCollaborators {
    pub fn with_verdicts(self, verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        self.verdicts.borrow_mut().extend(verdicts);
        self
    }

    pub fn with_divisions(self, divisions: impl IntoIterator<Item = Vec<ChildSpec>>) -> Self {
        self.divisions.borrow_mut().extend(divisions);
        self
    }

    pub fn with_rescues(self, rescues: impl IntoIterator<Item = Option<Status>>) -> Self {
        self.rescues.borrow_mut().extend(rescues);
        self
    }

    pub fn with_labels(self, labels: impl IntoIterator<Item = ValueLabel>) -> Self {
        self.labels.borrow_mut().extend(labels);
        self
    }

    pub fn with_votes(self, votes: impl IntoIterator<Item = usize>) -> Self {
        self.votes.borrow_mut().extend(votes);
        self
    }

    pub fn with_candidates(self, candidates: impl IntoIterator<Item = Vec<Candidate>>) -> Self {
        self.candidates.borrow_mut().extend(candidates);
        self
    }

    /// Number of `divide` calls made so far.
    pub fn divisions_requested(&self) -> usize {
        self.divide_calls.get()
    }

    /// Task text of every conquered node, in call order.
    pub fn conquered(&self) -> Vec<String> {
        self.conquered.borrow().clone()
    }

    /// `(task, count)` of every generate request, in call order.
    pub fn generate_requests(&self) -> Vec<(String, usize)> {
        self.generate_requests.borrow().clone()
    }
}

impl Conqueror for ScriptedCollaborators {
    fn conquer(&self, node: &TaskNode) -> Result<Verdict> {
        self.conquered.borrow_mut().push(node.task.clone());
        self.verdicts
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted verdict for node {}", node.id))
    }
}

impl Divider for ScriptedCollaborators {
    fn divide(&self, node: &TaskNode) -> Result<Vec<ChildSpec>> {
        self.divide_calls.set(self.divide_calls.get() + 1);
        self.divisions
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted division for node {}", node.id))
    }
}

impl Rescuer for ScriptedCollaborators {
    fn rescue(&self, _node: &TaskNode) -> Result<Option<Status>> {
        Ok(self.rescues.borrow_mut().pop_front().flatten())
    }
}

impl Evaluator for ScriptedCollaborators {
    fn value(&self, content: &str) -> Result<ValueLabel> {
        self.labels
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted value label for {content:?}"))
    }

    fn vote(&self, candidates: &[String]) -> Result<usize> {
        self.votes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted vote among {} candidates", candidates.len()))
    }
}

impl Generator for ScriptedCollaborators {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Vec<Candidate>> {
        self.generate_requests
            .borrow_mut()
            .push((request.task.to_string(), request.count));
        Ok(self.candidates.borrow_mut().pop_front().unwrap_or_default())
    }
}

/// Verdict with no result payload.
pub fn verdict(classification: Classification) -> Verdict {
    Verdict {
        classification,
        result: None,
    }
}

/// Child specs for the given task texts.
pub fn children(tasks: &[&str]) -> Vec<ChildSpec> {
    tasks
        .iter()
        .map(|task| ChildSpec {
            task: (*task).to_string(),
        })
        .collect()
}

/// Solve-kind candidates for the given task texts.
pub fn candidates(tasks: &[&str]) -> Vec<Candidate> {
    tasks
        .iter()
        .map(|task| Candidate {
            task: (*task).to_string(),
            kind: Default::default(),
        })
        .collect()
}
