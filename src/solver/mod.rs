//! Per-set fixed-point solver.
//!
//! One `CfgAnalyzer` computes, for a single cache set, the least fixed
//! point of `out(v) = update_block(v, join over in-edges e of
//! update_edge(e, out(src(e))))` over the whole CFG collection. Edges
//! leaving a synthetic call block take their input from the callee's exit
//! state, which is how the analysis follows a call chain.
//!
//! Query results stay valid until released; releases are use-counted and
//! an unmatched release is a programming bug.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::acs::arena::StateRef;
use crate::cfg::{BlockId, BlockKind, EdgeId, EdgeKind};
use crate::domain::Domain;
use crate::errors::AnalyzerError;
use crate::workspace::Workspace;

pub struct CfgAnalyzer {
    ws: Rc<Workspace>,
    set: usize,
    before: HashMap<BlockId, StateRef>,
    after: HashMap<BlockId, StateRef>,
    uses: HashMap<StateRef, u32>,
}

impl CfgAnalyzer {
    pub fn new(ws: Rc<Workspace>, set: usize) -> Self {
        Self { ws, set, before: HashMap::new(), after: HashMap::new(), uses: HashMap::new() }
    }

    pub fn set(&self) -> usize {
        self.set
    }

    /// Run the worklist iteration to the least fixed point.
    pub fn process(&mut self, dom: &mut dyn Domain) -> Result<(), AnalyzerError> {
        let ws = Rc::clone(&self.ws);
        let entry_block = ws.cfgs.entry_of(ws.cfgs.entry_cfg());

        for (v, _) in ws.cfgs.blocks.iter() {
            self.before.insert(v, dom.bot());
            self.after.insert(v, dom.bot());
        }

        let mut worklist: VecDeque<BlockId> = ws.cfgs.blocks.iter().map(|(id, _)| id).collect();
        let cap = (ws.cfgs.blocks.len() + ws.cfgs.edges.len() + 1) * (dom.height() + 2);
        let mut steps = 0usize;

        while let Some(v) = worklist.pop_front() {
            steps += 1;
            if steps > cap {
                return Err(AnalyzerError::FixedPointDiverged { set: self.set });
            }
            let block = &ws.cfgs.blocks[v];

            let mut new_in = if v == entry_block { dom.entry() } else { dom.bot() };
            for &e in &block.ins {
                let input = self.flow_input(e);
                let t = dom.update_edge(e, input);
                new_in = dom.join(new_in, t);
            }
            let new_out = dom.update_block(v, new_in);
            self.before.insert(v, new_in);

            let old = self.after[&v];
            if !dom.equals(old, new_out) {
                self.after.insert(v, new_out);
                for &e in &block.outs {
                    worklist.push_back(ws.cfgs.edges[e].snk);
                }
                // a changed exit state must reach the blocks after every
                // call site of this CFG
                if block.kind == BlockKind::Exit {
                    for &c in &ws.cfgs.cfgs[block.cfg].callers {
                        for &e in &ws.cfgs.blocks[c].outs {
                            if ws.cfgs.edges[e].kind != EdgeKind::Call {
                                worklist.push_back(ws.cfgs.edges[e].snk);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Out-state feeding edge `e`: the source's out-state, except that the
    /// non-call edges of a synthetic block carry the callee's exit state.
    fn flow_input(&self, e: EdgeId) -> StateRef {
        let edge = &self.ws.cfgs.edges[e];
        if edge.kind != EdgeKind::Call {
            if let Some(callee) = self.ws.cfgs.blocks[edge.src].callee() {
                return self.after[&self.ws.cfgs.exit_of(callee)];
            }
        }
        self.after[&edge.src]
    }

    fn use_state(&mut self, s: StateRef) -> StateRef {
        *self.uses.entry(s).or_insert(0) += 1;
        s
    }

    /// State at block entry (joined over in-edges). Release after use.
    pub fn before_block(&mut self, v: BlockId) -> StateRef {
        let s = *self.before.get(&v).expect("query for an unprocessed block");
        self.use_state(s)
    }

    /// State after the block's accesses. Release after use.
    pub fn after_block(&mut self, v: BlockId) -> StateRef {
        let s = *self.after.get(&v).expect("query for an unprocessed block");
        self.use_state(s)
    }

    /// State entering the sink along this edge, before any access of the
    /// sink. Release after use.
    pub fn before_edge(&mut self, dom: &mut dyn Domain, e: EdgeId) -> StateRef {
        let input = self.flow_input(e);
        let s = dom.update_edge(e, input);
        self.use_state(s)
    }

    /// State after the sink block executed in the context of this edge.
    /// Release after use.
    pub fn after_edge(&mut self, dom: &mut dyn Domain, e: EdgeId) -> StateRef {
        let input = self.flow_input(e);
        let t = dom.update_edge(e, input);
        let snk = self.ws.cfgs.edges[e].snk;
        let s = dom.update_block(snk, t);
        self.use_state(s)
    }

    /// State right before the k-th access of the block. Release after use.
    pub fn at_block(&mut self, dom: &mut dyn Domain, v: BlockId, k: usize) -> StateRef {
        let start = *self.before.get(&v).expect("query for an unprocessed block");
        self.replay(dom, v, k, start)
    }

    /// State right before the k-th access of the edge's sink, entered
    /// along this edge. Release after use.
    pub fn at_edge(&mut self, dom: &mut dyn Domain, e: EdgeId, k: usize) -> StateRef {
        let input = self.flow_input(e);
        let start = dom.update_edge(e, input);
        let snk = self.ws.cfgs.edges[e].snk;
        self.replay(dom, snk, k, start)
    }

    fn replay(&mut self, dom: &mut dyn Domain, v: BlockId, k: usize, start: StateRef) -> StateRef {
        let ws = Rc::clone(&self.ws);
        let accesses = &ws.cfgs.blocks[v].accesses;
        assert!(
            k < accesses.len(),
            "access {} not in block {}",
            k,
            ws.cfgs.blocks[v].name
        );
        let mut s = start;
        for a in &accesses[..k] {
            if a.touches_set(self.set) {
                s = dom.update_access(a, s);
            }
        }
        self.use_state(s)
    }

    /// Drop one use of a query result; returns the remaining use count.
    pub fn release(&mut self, s: StateRef) -> u32 {
        match self.uses.get_mut(&s) {
            Some(c) if *c > 0 => {
                *c -= 1;
                let left = *c;
                if left == 0 {
                    self.uses.remove(&s);
                }
                left
            }
            _ => panic!("unmatched ACS release"),
        }
    }

    /// Root states for the collector: everything stored in the node maps
    /// plus every outstanding query handle.
    pub fn collect(&self, roots: &mut Vec<StateRef>) {
        roots.extend(self.before.values().copied());
        roots.extend(self.after.values().copied());
        roots.extend(self.uses.keys().copied());
    }
}
