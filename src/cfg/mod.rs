//! Control-flow graphs the analysis runs on.
//!
//! A `CfgCollection` owns every CFG, block, edge, instruction and loop in
//! flat arenas; cross references are arena ids, so loops can point at their
//! headers and parents without cyclic ownership. Blocks carry the data
//! accesses attached by the access builder; edges carry the loop-entry and
//! loop-exit markers the persistence analyses react to.

use id_arena::{Arena, Id};
use std::collections::HashMap;

use crate::access::Access;
use crate::hard::Address;

pub type CfgId = Id<Cfg>;
pub type BlockId = Id<Block>;
pub type EdgeId = Id<Edge>;
pub type InstId = Id<Inst>;
pub type LoopId = Id<LoopInfo>;

/// One procedure-level control-flow graph.
#[derive(Debug)]
pub struct Cfg {
    pub name: String,
    pub entry: Option<BlockId>,
    pub exit: Option<BlockId>,
    pub blocks: Vec<BlockId>,
    /// Synthetic call blocks invoking this CFG.
    pub callers: Vec<BlockId>,
    /// The virtual top loop (the whole procedure body).
    pub top: Option<LoopId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    Exit,
    Basic,
    /// Synthetic block standing for a call to another CFG.
    Synth(CfgId),
}

#[derive(Debug)]
pub struct Block {
    pub cfg: CfgId,
    pub kind: BlockKind,
    pub name: String,
    pub ins: Vec<EdgeId>,
    pub outs: Vec<EdgeId>,
    /// Innermost loop containing this block (the CFG's top loop if none).
    pub loop_id: LoopId,
    /// Data accesses performed by this block, in program order.
    pub accesses: Vec<Access>,
}

impl Block {
    pub fn is_basic(&self) -> bool {
        self.kind == BlockKind::Basic
    }

    pub fn is_synth(&self) -> bool {
        matches!(self.kind, BlockKind::Synth(_))
    }

    pub fn callee(&self) -> Option<CfgId> {
        match self.kind {
            BlockKind::Synth(g) => Some(g),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Flow,
    LoopEntry,
    LoopExit,
    /// Linkage from a synthetic call block to its callee's entry.
    Call,
}

#[derive(Debug)]
pub struct Edge {
    pub src: BlockId,
    pub snk: BlockId,
    pub kind: EdgeKind,
}

/// A machine instruction performing data accesses. `multi_count` is the
/// number of memory transfers for multi-access instructions, 0 otherwise.
#[derive(Debug)]
pub struct Inst {
    pub address: Address,
    pub multi_count: usize,
}

impl Inst {
    pub fn is_multi(&self) -> bool {
        self.multi_count > 1
    }
}

/// Entry of the flat loop table. The top loop of a CFG has no header and no
/// parent and sits at depth 0.
#[derive(Debug)]
pub struct LoopInfo {
    pub cfg: CfgId,
    pub header: Option<BlockId>,
    pub parent: Option<LoopId>,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct CfgCollection {
    pub cfgs: Arena<Cfg>,
    pub blocks: Arena<Block>,
    pub edges: Arena<Edge>,
    pub insts: Arena<Inst>,
    pub loops: Arena<LoopInfo>,
    inst_map: HashMap<Address, InstId>,
    entry: Option<CfgId>,
}

impl CfgCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CFG with its entry/exit blocks and top loop. The first CFG
    /// added becomes the program entry.
    pub fn add_cfg(&mut self, name: &str) -> CfgId {
        let g = self.cfgs.alloc(Cfg {
            name: name.to_string(),
            entry: None,
            exit: None,
            blocks: Vec::new(),
            callers: Vec::new(),
            top: None,
        });
        let top = self.loops.alloc(LoopInfo { cfg: g, header: None, parent: None, depth: 0 });
        let entry = self.blocks.alloc(Block {
            cfg: g,
            kind: BlockKind::Entry,
            name: format!("{}.entry", name),
            ins: Vec::new(),
            outs: Vec::new(),
            loop_id: top,
            accesses: Vec::new(),
        });
        let exit = self.blocks.alloc(Block {
            cfg: g,
            kind: BlockKind::Exit,
            name: format!("{}.exit", name),
            ins: Vec::new(),
            outs: Vec::new(),
            loop_id: top,
            accesses: Vec::new(),
        });
        let cfg = &mut self.cfgs[g];
        cfg.entry = Some(entry);
        cfg.exit = Some(exit);
        cfg.top = Some(top);
        cfg.blocks.push(entry);
        cfg.blocks.push(exit);
        if self.entry.is_none() {
            self.entry = Some(g);
        }
        g
    }

    pub fn add_block(&mut self, g: CfgId, name: &str) -> BlockId {
        let top = self.top_of(g);
        let v = self.blocks.alloc(Block {
            cfg: g,
            kind: BlockKind::Basic,
            name: name.to_string(),
            ins: Vec::new(),
            outs: Vec::new(),
            loop_id: top,
            accesses: Vec::new(),
        });
        self.cfgs[g].blocks.push(v);
        v
    }

    /// Create a synthetic call block and wire the call edge to the callee's
    /// entry.
    pub fn add_synth(&mut self, g: CfgId, name: &str, callee: CfgId) -> BlockId {
        let top = self.top_of(g);
        let v = self.blocks.alloc(Block {
            cfg: g,
            kind: BlockKind::Synth(callee),
            name: name.to_string(),
            ins: Vec::new(),
            outs: Vec::new(),
            loop_id: top,
            accesses: Vec::new(),
        });
        self.cfgs[g].blocks.push(v);
        self.cfgs[callee].callers.push(v);
        let callee_entry = self.entry_of(callee);
        self.add_edge(v, callee_entry, EdgeKind::Call);
        v
    }

    pub fn add_edge(&mut self, src: BlockId, snk: BlockId, kind: EdgeKind) -> EdgeId {
        let e = self.edges.alloc(Edge { src, snk, kind });
        self.blocks[src].outs.push(e);
        self.blocks[snk].ins.push(e);
        e
    }

    /// Register a loop with the given header. A missing parent nests the
    /// loop directly under the CFG's top loop.
    pub fn add_loop(&mut self, g: CfgId, header: BlockId, parent: Option<LoopId>) -> LoopId {
        let parent = parent.unwrap_or_else(|| self.top_of(g));
        let depth = self.loops[parent].depth + 1;
        let l = self.loops.alloc(LoopInfo { cfg: g, header: Some(header), parent: Some(parent), depth });
        self.blocks[header].loop_id = l;
        l
    }

    pub fn assign_loop(&mut self, v: BlockId, l: LoopId) {
        self.blocks[v].loop_id = l;
    }

    pub fn set_accesses(&mut self, v: BlockId, accesses: Vec<Access>) {
        self.blocks[v].accesses = accesses;
    }

    /// Instruction record for the given address, created on first use.
    pub fn inst_at(&mut self, address: Address, multi_count: usize) -> InstId {
        if let Some(&i) = self.inst_map.get(&address) {
            if multi_count > self.insts[i].multi_count {
                self.insts[i].multi_count = multi_count;
            }
            return i;
        }
        let i = self.insts.alloc(Inst { address, multi_count });
        self.inst_map.insert(address, i);
        i
    }

    pub fn entry_cfg(&self) -> CfgId {
        self.entry.expect("empty CFG collection")
    }

    pub fn entry_of(&self, g: CfgId) -> BlockId {
        self.cfgs[g].entry.expect("CFG not fully built")
    }

    pub fn exit_of(&self, g: CfgId) -> BlockId {
        self.cfgs[g].exit.expect("CFG not fully built")
    }

    pub fn top_of(&self, g: CfgId) -> LoopId {
        self.cfgs[g].top.expect("CFG not fully built")
    }

    /// Innermost loop containing the block.
    pub fn loop_of(&self, v: BlockId) -> LoopId {
        self.blocks[v].loop_id
    }

    pub fn is_top(&self, l: LoopId) -> bool {
        self.loops[l].header.is_none()
    }

    pub fn loop_depth(&self, l: LoopId) -> usize {
        self.loops[l].depth
    }

    /// True when `outer` contains `inner` (reflexively).
    pub fn includes(&self, outer: LoopId, inner: LoopId) -> bool {
        let mut l = Some(inner);
        while let Some(cur) = l {
            if cur == outer {
                return true;
            }
            l = self.loops[cur].parent;
        }
        false
    }

    /// First block executed by a CFG: the sink of the entry block's first
    /// out edge. Used as the persistence scope anchor at the top level.
    pub fn entry_successor(&self, g: CfgId) -> BlockId {
        let entry = self.entry_of(g);
        let e = *self.blocks[entry]
            .outs
            .first()
            .expect("CFG entry has no successor");
        self.edges[e].snk
    }

    pub fn edge_name(&self, e: EdgeId) -> String {
        let edge = &self.edges[e];
        format!("{} -> {}", self.blocks[edge.src].name, self.blocks[edge.snk].name)
    }
}
