// Copyright (c) 2025-2026 brdigetrlol. All rights reserved.
// SPDX-License-Identifier: LicenseRef-Icarus-Proprietary
// See LICENSE in the repository root for full license terms.

//! Graphs of nodes evaluated as a single node.
//!
//! Forward edges form a DAG scheduled by Kahn's algorithm, ties broken by
//! the order nodes were added. Feedback edges live in a separate registry
//! keyed by node index and may close cycles; consumers read the producers'
//! outputs from the previous timestep.
//!
//! Per timestep:
//! 1. Nodes without forward predecessors receive the model input.
//! 2. Other nodes receive their predecessors' outputs, concatenated in
//!    edge-insertion order.
//! 3. Feedback consumers additionally receive the previous-step snapshot.
//! 4. The snapshot is committed; the model output is the concatenation of
//!    output nodes (no forward successors) in schedule order.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use resonant_math::Precision;
use tracing::debug;

use crate::config::{EsnConfig, OfflineConfig, OnlineTrainConfig};
use crate::error::{EngineError, Result};
use crate::feedback::FeedbackRegistry;
use crate::node::{concat_columns, concat_vectors, Node, ParamMap};
use crate::nodes::{Input, Reservoir, Ridge};
use crate::persistence::ModelParams;
use crate::training::{FitReport, OfflineTrainer, OnlineTrainer, Targets};

/// Cached evaluation order, rebuilt after any structural change.
#[derive(Debug)]
struct ExecutionPlan {
    order: Vec<usize>,
    /// Forward predecessors of each node, in edge-insertion order
    predecessors: Vec<Vec<usize>>,
    /// Nodes fed by the model input, in schedule order
    inputs: Vec<usize>,
    /// Nodes whose outputs form the model output, in schedule order
    outputs: Vec<usize>,
}

/// How trainable nodes behave during one timestep.
enum Teacher<'a> {
    Free,
    /// Forced nodes emit their target and record their input at row `t`.
    Collect {
        forced: &'a BTreeMap<usize, DVector<f64>>,
        sink: &'a mut BTreeMap<usize, DMatrix<f64>>,
        t: usize,
        rows: usize,
    },
    /// Trainees predict then learn; downstream sees the target when forcing.
    Online {
        targets: &'a BTreeMap<usize, DVector<f64>>,
        force: bool,
        predictions: BTreeMap<usize, DVector<f64>>,
    },
}

pub struct Model {
    name: String,
    nodes: Vec<Box<dyn Node>>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    feedback: FeedbackRegistry,
    plan: OnceCell<Arc<ExecutionPlan>>,
    precision: Option<Precision>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: Vec<(&str, &str)> = self
            .edges
            .iter()
            .map(|&(a, b)| (self.node_name(a), self.node_name(b)))
            .collect();
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("nodes", &self.nodes.iter().map(|n| n.name()).collect::<Vec<_>>())
            .field("edges", &edges)
            .finish()
    }
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            feedback: FeedbackRegistry::new(),
            plan: OnceCell::new(),
            precision: None,
        }
    }

    /// Add the nodes in order and link each to the next.
    pub fn sequential(name: impl Into<String>, nodes: Vec<Box<dyn Node>>) -> Result<Self> {
        let mut model = Self::new(name);
        let mut names = Vec::with_capacity(nodes.len());
        for node in nodes {
            names.push(node.name().to_string());
            model.add_boxed(node)?;
        }
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        model.chain(&names)?;
        Ok(model)
    }

    /// Input → Reservoir → Ridge, with readout feedback into the reservoir
    /// when `config.feedback` is set.
    pub fn esn(config: &EsnConfig) -> Result<Self> {
        config.validate()?;
        let precision = config.reservoir.precision;
        let mut model = Self::new("esn");
        model.add_node(Input::new("input").with_precision(precision))?;
        model.add_node(Reservoir::new("reservoir", config.reservoir.clone())?)?;
        model.add_node(Ridge::new("readout", config.readout.clone())?)?;
        model.chain(&["input", "reservoir", "readout"])?;
        if config.feedback {
            model.link_feedback("reservoir", "readout")?;
        }
        Ok(model)
    }

    // ─── Structure ───────────────────────────────────

    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<()> {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> Result<()> {
        self.check_new_node(node.as_ref())?;
        self.precision.get_or_insert(node.precision());
        self.index.insert(node.name().to_string(), self.nodes.len());
        self.nodes.push(node);
        self.invalidate();
        Ok(())
    }

    fn check_new_node(&self, node: &dyn Node) -> Result<()> {
        let name = node.name();
        if name.is_empty() || name.contains('.') {
            return Err(EngineError::InvalidConfig(format!(
                "node name '{name}' must be non-empty and must not contain '.'"
            )));
        }
        if self.index.contains_key(name) {
            return Err(EngineError::DuplicateNode(name.to_string()));
        }
        match self.precision {
            Some(expected) if expected != node.precision() => Err(EngineError::PrecisionMismatch {
                node: name.to_string(),
                expected,
                found: node.precision(),
            }),
            _ => Ok(()),
        }
    }

    fn idx(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownNode(name.to_string()))
    }

    /// Forward edge `from → to`.
    pub fn link(&mut self, from: &str, to: &str) -> Result<()> {
        let (a, b) = (self.idx(from)?, self.idx(to)?);
        if self.edges.contains(&(a, b)) {
            return Ok(());
        }
        if a == b || self.reaches(b, a) {
            return Err(EngineError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.edges.push((a, b));
        self.invalidate();
        Ok(())
    }

    /// Remove a forward edge. Returns whether it existed.
    pub fn unlink(&mut self, from: &str, to: &str) -> Result<bool> {
        let (a, b) = (self.idx(from)?, self.idx(to)?);
        let before = self.edges.len();
        self.edges.retain(|e| *e != (a, b));
        let removed = self.edges.len() != before;
        if removed {
            self.invalidate();
        }
        Ok(removed)
    }

    /// `consumer` reads `producer`'s previous-step output as feedback.
    pub fn link_feedback(&mut self, consumer: &str, producer: &str) -> Result<()> {
        let c = self
            .index
            .get(consumer)
            .copied()
            .ok_or_else(|| EngineError::UnresolvedFeedback(consumer.to_string()))?;
        let p = self
            .index
            .get(producer)
            .copied()
            .ok_or_else(|| EngineError::UnresolvedFeedback(producer.to_string()))?;
        if !self.nodes[c].accepts_feedback() {
            return Err(EngineError::Shape(format!(
                "node '{consumer}' does not accept feedback"
            )));
        }
        self.feedback.add(c, p);
        Ok(())
    }

    /// Link each named node to the next one.
    pub fn chain(&mut self, names: &[&str]) -> Result<()> {
        for pair in names.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Absorb every node and edge of `other`. Fails without modifying
    /// `self` if any name is already taken or precisions differ.
    pub fn merge(&mut self, other: Model) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut precision = self.precision;
        for node in &other.nodes {
            if !seen.insert(node.name()) {
                return Err(EngineError::DuplicateNode(node.name().to_string()));
            }
            self.check_new_node(node.as_ref())?;
            match precision {
                Some(expected) if expected != node.precision() => {
                    return Err(EngineError::PrecisionMismatch {
                        node: node.name().to_string(),
                        expected,
                        found: node.precision(),
                    })
                }
                _ => precision = Some(node.precision()),
            }
        }

        let offset = self.nodes.len();
        self.precision = precision;
        for node in other.nodes {
            self.index.insert(node.name().to_string(), self.nodes.len());
            self.nodes.push(node);
        }
        self.edges
            .extend(other.edges.iter().map(|&(a, b)| (a + offset, b + offset)));
        self.feedback.extend(other.feedback.shifted(offset));
        self.invalidate();
        Ok(())
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut visited = vec![false; self.nodes.len()];
        while let Some(i) = stack.pop() {
            if i == to {
                return true;
            }
            if std::mem::replace(&mut visited[i], true) {
                continue;
            }
            stack.extend(self.edges.iter().filter(|e| e.0 == i).map(|e| e.1));
        }
        false
    }

    fn invalidate(&mut self) {
        self.plan.take();
    }

    // ─── Accessors ───────────────────────────────────

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<&dyn Node> {
        self.index.get(name).map(|&i| self.nodes[i].as_ref())
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut (dyn Node + 'static)> {
        let i = *self.index.get(name)?;
        Some(self.nodes[i].as_mut())
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name())
    }

    pub(crate) fn node_name(&self, idx: usize) -> &str {
        self.nodes[idx].name()
    }

    pub(crate) fn node_mut_at(&mut self, idx: usize) -> &mut dyn Node {
        self.nodes[idx].as_mut()
    }

    /// Nodes without incoming forward edges, in insertion order.
    pub fn input_nodes(&self) -> Vec<&str> {
        (0..self.nodes.len())
            .filter(|i| !self.edges.iter().any(|e| e.1 == *i))
            .map(|i| self.node_name(i))
            .collect()
    }

    /// Nodes without outgoing forward edges, in insertion order.
    pub fn output_nodes(&self) -> Vec<&str> {
        (0..self.nodes.len())
            .filter(|i| !self.edges.iter().any(|e| e.0 == *i))
            .map(|i| self.node_name(i))
            .collect()
    }

    /// Node names in evaluation order.
    pub fn schedule(&self) -> Result<Vec<&str>> {
        Ok(self.plan()?.order.iter().map(|&i| self.node_name(i)).collect())
    }

    // ─── Scheduling ──────────────────────────────────

    fn plan(&self) -> Result<Arc<ExecutionPlan>> {
        if let Some(plan) = self.plan.get() {
            return Ok(plan.clone());
        }
        let plan = Arc::new(self.build_plan()?);
        let _ = self.plan.set(plan.clone());
        Ok(plan)
    }

    fn build_plan(&self) -> Result<ExecutionPlan> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        for &(a, b) in &self.edges {
            indegree[b] += 1;
            successors[a].push(b);
            predecessors[b].push(a);
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &s in &successors[i] {
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    ready.insert(s);
                }
            }
        }
        if order.len() != n {
            let stuck = (0..n).find(|i| indegree[*i] > 0).unwrap_or(0);
            let from = predecessors[stuck].first().copied().unwrap_or(stuck);
            return Err(EngineError::Cycle {
                from: self.node_name(from).to_string(),
                to: self.node_name(stuck).to_string(),
            });
        }

        let inputs = order
            .iter()
            .copied()
            .filter(|i| predecessors[*i].is_empty())
            .collect();
        let outputs = order
            .iter()
            .copied()
            .filter(|i| successors[*i].is_empty())
            .collect();
        debug!(model = %self.name, order = ?order, "schedule computed");
        Ok(ExecutionPlan {
            order,
            predecessors,
            inputs,
            outputs,
        })
    }

    // ─── Execution ───────────────────────────────────

    /// One timestep.
    pub fn call(&mut self, input: &DVector<f64>) -> Result<DVector<f64>> {
        self.step(input, &mut Teacher::Free)
    }

    fn ensure_initialized(&mut self, sample: &DVector<f64>) -> Result<()> {
        if self.is_empty() {
            return Err(EngineError::Shape(format!("model '{}' has no nodes", self.name)));
        }
        if !self.is_initialized() {
            self.initialize(sample)?;
        }
        Ok(())
    }

    fn step(&mut self, x: &DVector<f64>, teacher: &mut Teacher<'_>) -> Result<DVector<f64>> {
        self.ensure_initialized(x)?;
        let plan = self.plan()?;
        let mut outputs: Vec<Option<DVector<f64>>> = vec![None; self.nodes.len()];

        for &i in &plan.order {
            let preds = &plan.predecessors[i];
            let input = if preds.is_empty() {
                x.clone()
            } else {
                concat_vectors(preds.iter().filter_map(|p| outputs[*p].as_ref()))
            };
            let feedback = self.feedback.gather(
                i,
                |p| self.nodes[p].output_dim(),
                |p| {
                    let producer = &self.nodes[p];
                    let name = producer.name().to_string();
                    if producer.is_trainable() && !producer.is_fitted() {
                        EngineError::UseBeforeFit(name)
                    } else {
                        EngineError::NotInitialized(name)
                    }
                },
            )?;

            let out = match teacher {
                Teacher::Collect {
                    forced,
                    sink,
                    t,
                    rows,
                } if forced.contains_key(&i) => {
                    let target = &forced[&i];
                    let m = sink
                        .entry(i)
                        .or_insert_with(|| DMatrix::zeros(*rows, input.len()));
                    if m.ncols() != input.len() {
                        return Err(EngineError::Shape(format!(
                            "'{}' received inputs of changing dimension",
                            self.nodes[i].name()
                        )));
                    }
                    m.set_row(*t, &input.transpose());
                    if self.nodes[i].is_initialized() {
                        self.nodes[i].set_state(target)?;
                    }
                    target.clone()
                }
                Teacher::Online {
                    targets,
                    force,
                    predictions,
                } if targets.contains_key(&i) => {
                    let target = &targets[&i];
                    let name = self.nodes[i].name().to_string();
                    let learner = self.nodes[i]
                        .as_online()
                        .ok_or(EngineError::NotTrainable(name))?;
                    let pred = learner.partial_fit(&input, target)?;
                    predictions.insert(i, pred.clone());
                    if *force {
                        target.clone()
                    } else {
                        pred
                    }
                }
                _ => self.nodes[i].forward(&input, feedback.as_ref())?,
            };
            outputs[i] = Some(out);
        }

        self.feedback.commit(&outputs);
        let reported = match teacher {
            Teacher::Online { predictions, .. } => Some(&*predictions),
            _ => None,
        };
        Ok(concat_vectors(plan.outputs.iter().filter_map(|o| {
            reported
                .and_then(|p| p.get(o))
                .or(outputs[*o].as_ref())
        })))
    }

    /// Whole-sequence evaluation, one node at a time. Only valid without
    /// feedback edges.
    fn run_batched(&mut self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let plan = self.plan()?;
        let mut outputs: Vec<Option<DMatrix<f64>>> = vec![None; self.nodes.len()];
        for &i in &plan.order {
            let preds = &plan.predecessors[i];
            let input = if preds.is_empty() {
                inputs.clone()
            } else {
                let parts: Vec<&DMatrix<f64>> =
                    preds.iter().filter_map(|p| outputs[*p].as_ref()).collect();
                concat_columns(&parts)?
            };
            outputs[i] = Some(self.nodes[i].run(&input)?);
        }
        let parts: Vec<&DMatrix<f64>> = plan
            .outputs
            .iter()
            .filter_map(|o| outputs[*o].as_ref())
            .collect();
        concat_columns(&parts)
    }

    // ─── Training ────────────────────────────────────

    /// Offline fit with an explicit protocol. Targets are either shared
    /// (single readout) or keyed by readout name.
    pub fn fit_with(
        &mut self,
        inputs: &[DMatrix<f64>],
        targets: impl Into<Targets>,
        config: &OfflineConfig,
    ) -> Result<FitReport> {
        OfflineTrainer::new(config.clone()).fit_model(self, inputs, targets)
    }

    /// Online pass over one sequence; returns pre-update predictions.
    pub fn train(
        &mut self,
        sequence: &DMatrix<f64>,
        targets: impl Into<Targets>,
        force_teachers: bool,
    ) -> Result<DMatrix<f64>> {
        OnlineTrainer::new(OnlineTrainConfig { force_teachers }).train_model(self, sequence, targets)
    }

    fn resolve_targets<T: Clone>(
        &mut self,
        targets: &Targets,
        capable: impl Fn(&mut dyn Node) -> bool,
        pick: impl Fn(&Vec<DMatrix<f64>>) -> Result<T>,
    ) -> Result<BTreeMap<usize, T>> {
        match targets {
            Targets::Shared(seqs) => {
                let trainees: Vec<usize> = (0..self.nodes.len())
                    .filter(|i| capable(self.nodes[*i].as_mut()))
                    .collect();
                match trainees.as_slice() {
                    [only] => Ok(BTreeMap::from([(*only, pick(seqs)?)])),
                    [] => Err(EngineError::NotTrainable(self.name.clone())),
                    many => Err(EngineError::InvalidConfig(format!(
                        "model '{}' has {} trainable nodes; targets must be keyed by node name",
                        self.name,
                        many.len()
                    ))),
                }
            }
            Targets::PerNode(map) => {
                let mut out = BTreeMap::new();
                for (name, seqs) in map {
                    let i = self.idx(name)?;
                    if !capable(self.nodes[i].as_mut()) {
                        return Err(EngineError::NotTrainable(name.clone()));
                    }
                    out.insert(i, pick(seqs)?);
                }
                Ok(out)
            }
        }
    }

    pub(crate) fn resolve_offline_targets(
        &mut self,
        targets: &Targets,
    ) -> Result<BTreeMap<usize, Vec<DMatrix<f64>>>> {
        self.resolve_targets(targets, |n| n.as_offline().is_some(), |s| Ok(s.clone()))
    }

    /// Fix readout output dimensions from the targets and initialize the
    /// graph from the first available timestep.
    pub(crate) fn prepare_fit(
        &mut self,
        trainees: &BTreeMap<usize, Vec<DMatrix<f64>>>,
        inputs: &[DMatrix<f64>],
    ) -> Result<()> {
        for (&i, seqs) in trainees {
            let name = self.node_name(i).to_string();
            let dim = seqs.first().map_or(0, |m| m.ncols());
            self.nodes[i]
                .as_offline()
                .ok_or(EngineError::NotTrainable(name))?
                .set_output_dim(dim)?;
        }
        if let Some(seq) = inputs.iter().find(|s| s.nrows() > 0) {
            self.ensure_initialized(&seq.row(0).transpose())?;
        }
        Ok(())
    }

    /// Run one sequence with the given nodes teacher-forced. Returns the
    /// input rows each forced node received.
    pub(crate) fn collect_sequence(
        &mut self,
        sequence: &DMatrix<f64>,
        forced: &BTreeMap<usize, &DMatrix<f64>>,
    ) -> Result<BTreeMap<usize, DMatrix<f64>>> {
        let rows = sequence.nrows();
        let mut sink = BTreeMap::new();
        for t in 0..rows {
            let row_targets: BTreeMap<usize, DVector<f64>> = forced
                .iter()
                .map(|(i, m)| (*i, m.row(t).transpose()))
                .collect();
            let mut teacher = Teacher::Collect {
                forced: &row_targets,
                sink: &mut sink,
                t,
                rows,
            };
            self.step(&sequence.row(t).transpose(), &mut teacher)?;
        }
        Ok(sink)
    }

    pub(crate) fn train_online(
        &mut self,
        sequence: &DMatrix<f64>,
        targets: &Targets,
        force: bool,
    ) -> Result<DMatrix<f64>> {
        let trainees = self.resolve_targets(
            targets,
            |n| n.as_online().is_some(),
            |seqs| match seqs.as_slice() {
                [one] => Ok(one.clone()),
                _ => Err(EngineError::Shape(format!(
                    "online training takes one target sequence, got {}",
                    seqs.len()
                ))),
            },
        )?;
        for (&i, y) in &trainees {
            let name = self.node_name(i).to_string();
            if y.nrows() != sequence.nrows() {
                return Err(EngineError::Shape(format!(
                    "'{name}': {} input rows but {} target rows",
                    sequence.nrows(),
                    y.nrows()
                )));
            }
            self.nodes[i]
                .as_online()
                .ok_or(EngineError::NotTrainable(name))?
                .set_output_dim(y.ncols())?;
        }

        let mut rows = Vec::with_capacity(sequence.nrows());
        for t in 0..sequence.nrows() {
            let row_targets: BTreeMap<usize, DVector<f64>> = trainees
                .iter()
                .map(|(i, m)| (*i, m.row(t).transpose()))
                .collect();
            let mut teacher = Teacher::Online {
                targets: &row_targets,
                force,
                predictions: BTreeMap::new(),
            };
            rows.push(self.step(&sequence.row(t).transpose(), &mut teacher)?);
        }
        debug!(model = %self.name, steps = rows.len(), force, "online pass complete");
        Ok(stack_rows(&rows, self.output_dim().unwrap_or(0)))
    }

    // ─── Persistence ─────────────────────────────────

    pub fn export_params(&self) -> ModelParams {
        ModelParams {
            model: self.name.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| (n.name().to_string(), n.params()))
                .filter(|(_, p)| !p.is_empty())
                .collect(),
        }
    }

    pub fn import_params(&mut self, params: &ModelParams) -> Result<()> {
        for (name, p) in &params.nodes {
            let i = self.idx(name)?;
            self.nodes[i].load_params(p)?;
        }
        self.invalidate();
        Ok(())
    }

    /// Write every node's parameters as JSON.
    pub fn save_params(&self, path: impl AsRef<Path>) -> Result<()> {
        self.export_params().save(path)
    }

    pub fn load_params_from(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let params = ModelParams::load(path)?;
        self.import_params(&params)
    }
}

fn stack_rows(rows: &[DVector<f64>], width: usize) -> DMatrix<f64> {
    let width = rows.first().map_or(width, |r| r.len());
    let mut out = DMatrix::<f64>::zeros(rows.len(), width);
    for (t, r) in rows.iter().enumerate() {
        out.set_row(t, &r.transpose());
    }
    out
}

impl Node for Model {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "model"
    }

    fn input_dim(&self) -> Option<usize> {
        let plan = self.plan().ok()?;
        plan.inputs.iter().find_map(|&i| self.nodes[i].input_dim())
    }

    fn output_dim(&self) -> Option<usize> {
        let plan = self.plan().ok()?;
        plan.outputs.iter().map(|&o| self.nodes[o].output_dim()).sum()
    }

    fn precision(&self) -> Precision {
        self.precision.unwrap_or_default()
    }

    fn is_initialized(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().all(|n| n.is_initialized())
            && self
                .feedback
                .consumers()
                .all(|c| self.nodes[c].feedback_dim().is_some())
    }

    fn is_trainable(&self) -> bool {
        self.nodes.iter().any(|n| n.is_trainable())
    }

    fn is_fitted(&self) -> bool {
        self.is_trainable()
            && self
                .nodes
                .iter()
                .filter(|n| n.is_trainable())
                .all(|n| n.is_fitted())
    }

    fn initialize(&mut self, sample: &DVector<f64>) -> Result<()> {
        let plan = self.plan()?;
        for &i in &plan.order {
            let preds = &plan.predecessors[i];
            let produced: Option<usize> = if preds.is_empty() {
                Some(sample.len())
            } else {
                preds.iter().map(|&p| self.nodes[p].output_dim()).sum()
            };
            let Some(produced) = produced else {
                debug!(node = self.nodes[i].name(), "upstream dimension unknown, deferring");
                continue;
            };
            if let Some(expected) = self.nodes[i].input_dim() {
                if expected != produced {
                    let producer = if preds.is_empty() {
                        self.name.clone()
                    } else {
                        preds
                            .iter()
                            .map(|&p| self.node_name(p))
                            .collect::<Vec<_>>()
                            .join("+")
                    };
                    return Err(EngineError::DimensionMismatch {
                        producer,
                        consumer: self.node_name(i).to_string(),
                        produced,
                        expected,
                    });
                }
            }
            if preds.is_empty() {
                self.nodes[i].initialize(sample)?;
            } else {
                self.nodes[i].initialize(&DVector::zeros(produced))?;
            }
        }

        let consumers: Vec<usize> = self.feedback.consumers().collect();
        for c in consumers {
            let Some(width) = self.feedback.width(c, |p| self.nodes[p].output_dim()) else {
                continue;
            };
            if self.nodes[c].feedback_dim() != Some(width) {
                self.nodes[c].initialize_feedback(&DVector::zeros(width))?;
            }
        }
        debug!(model = %self.name, nodes = self.nodes.len(), "model initialized");
        Ok(())
    }

    fn reset_shape(&mut self) {
        for node in &mut self.nodes {
            node.reset_shape();
        }
        self.feedback.reset();
    }

    fn forward(
        &mut self,
        input: &DVector<f64>,
        feedback: Option<&DVector<f64>>,
    ) -> Result<DVector<f64>> {
        if feedback.is_some() {
            return Err(EngineError::Shape(format!(
                "model '{}' does not accept external feedback",
                self.name
            )));
        }
        self.call(input)
    }

    fn run(&mut self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if inputs.nrows() == 0 {
            return Ok(DMatrix::zeros(0, self.output_dim().unwrap_or(0)));
        }
        self.ensure_initialized(&inputs.row(0).transpose())?;
        if self.feedback.is_empty() {
            return self.run_batched(inputs);
        }
        let mut rows = Vec::with_capacity(inputs.nrows());
        for t in 0..inputs.nrows() {
            rows.push(self.call(&inputs.row(t).transpose())?);
        }
        Ok(stack_rows(&rows, self.output_dim().unwrap_or(0)))
    }

    /// Node states concatenated in schedule order.
    fn state(&self) -> Option<DVector<f64>> {
        let plan = self.plan().ok()?;
        let states = plan
            .order
            .iter()
            .map(|&i| self.nodes[i].state())
            .collect::<Option<Vec<_>>>()?;
        Some(concat_vectors(&states))
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        let plan = self.plan()?;
        let mut widths = Vec::with_capacity(plan.order.len());
        for &i in &plan.order {
            let w = self.nodes[i]
                .state()
                .map(|s| s.len())
                .ok_or_else(|| EngineError::NotInitialized(self.node_name(i).to_string()))?;
            widths.push(w);
        }
        let total: usize = widths.iter().sum();
        if state.len() != total {
            return Err(EngineError::Shape(format!(
                "model '{}' state has {total} entries, got {}",
                self.name,
                state.len()
            )));
        }
        let mut offset = 0;
        for (&i, w) in plan.order.iter().zip(widths) {
            let part = state.rows(offset, w).into_owned();
            self.nodes[i].set_state(&part)?;
            self.feedback.record(i, part);
            offset += w;
        }
        Ok(())
    }

    fn reset(&mut self, to: Option<&DVector<f64>>) -> Result<()> {
        if let Some(state) = to {
            return self.set_state(state);
        }
        for node in &mut self.nodes {
            if node.state().is_some() {
                node.reset(None)?;
            }
        }
        self.feedback.reset();
        Ok(())
    }

    /// Parameters of every node, keyed `"node.param"`.
    fn params(&self) -> ParamMap {
        let mut out = ParamMap::new();
        for node in &self.nodes {
            for (key, value) in node.params() {
                out.insert(format!("{}.{key}", node.name()), value);
            }
        }
        out
    }

    fn load_params(&mut self, params: &ParamMap) -> Result<()> {
        let mut grouped: BTreeMap<&str, ParamMap> = BTreeMap::new();
        for (key, value) in params {
            let (node, param) = key.split_once('.').ok_or_else(|| {
                EngineError::Shape(format!("parameter key '{key}' is not of the form node.param"))
            })?;
            grouped
                .entry(node)
                .or_default()
                .insert(param.to_string(), value.clone());
        }
        for (node, p) in grouped {
            let i = self.idx(node)?;
            self.nodes[i].load_params(&p)?;
        }
        Ok(())
    }

    fn fit(
        &mut self,
        inputs: &[DMatrix<f64>],
        targets: &[DMatrix<f64>],
        washout: usize,
    ) -> Result<FitReport> {
        let config = OfflineConfig {
            washout,
            ..OfflineConfig::default()
        };
        self.fit_with(inputs, targets.to_vec(), &config)
    }
}
