//! Multi-level persistence analysis.
//!
//! The state is a stack of PERS states, one per loop-nesting level at the
//! program point, outermost at index 0. Loop-entry edges push a fresh
//! scope, loop-exit edges pop the levels of every exited loop, and call
//! returns truncate to the depth recorded at the synthetic call block.

use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use crate::access::Access;
use crate::acs::arena::StateRef;
use crate::cfg::{BlockId, EdgeId, EdgeKind};
use crate::domain::{ArenaRef, Domain, Pers};
use crate::workspace::Workspace;

pub struct MultiPers {
    ws: Rc<Workspace>,
    arena: ArenaRef,
    set: usize,
    pers: Pers,
    bot: StateRef,
    top: StateRef,
    last: Option<StateRef>,
    /// Stack depth observed at each synthetic call block.
    depths: HashMap<BlockId, usize>,
}

impl MultiPers {
    pub fn new(ws: Rc<Workspace>, arena: ArenaRef, set: usize, assoc: usize) -> Self {
        let pers = Pers::new(Rc::clone(&ws), Rc::clone(&arena), set, assoc);
        let bot = arena.borrow_mut().alloc_multi(vec![pers.bot()]);
        let top = arena.borrow_mut().alloc_multi(vec![pers.top()]);
        Self { ws, arena, set, pers, bot, top, last: None, depths: HashMap::new() }
    }

    pub fn assoc(&self) -> u8 {
        self.pers.assoc()
    }

    fn levels(&self, s: StateRef) -> Vec<StateRef> {
        self.arena.borrow().multi(s).levels.clone()
    }

    fn alloc(&mut self, levels: Vec<StateRef>) -> StateRef {
        let r = self.arena.borrow_mut().alloc_multi(levels);
        self.last = Some(r);
        r
    }

    /// Copy with a new depth: truncated, or padded with fresh PERS scopes.
    fn resize(&mut self, s: StateRef, new_len: usize) -> StateRef {
        let mut levels = self.levels(s);
        levels.truncate(new_len);
        while levels.len() < new_len {
            levels.push(self.pers.entry());
        }
        self.alloc(levels)
    }
}

impl Domain for MultiPers {
    fn set(&self) -> usize {
        self.set
    }

    fn bot(&self) -> StateRef {
        self.bot
    }

    fn top(&self) -> StateRef {
        self.top
    }

    fn entry(&self) -> StateRef {
        self.top
    }

    fn equals(&self, s1: StateRef, s2: StateRef) -> bool {
        if s1 == s2 {
            return true;
        }
        let (l1, l2) = (self.levels(s1), self.levels(s2));
        l1.len() == l2.len()
            && l1.iter().zip(l2.iter()).all(|(&a, &b)| self.pers.equals(a, b))
    }

    fn join(&mut self, s1: StateRef, s2: StateRef) -> StateRef {
        if s1 == self.bot {
            return s2;
        }
        if s2 == self.bot {
            return s1;
        }
        let (l1, l2) = (self.levels(s1), self.levels(s2));
        let (mut long, short) = if l1.len() >= l2.len() { (l1, l2) } else { (l2, l1) };
        for i in 0..short.len() {
            long[i] = self.pers.join(long[i], short[i]);
        }
        self.alloc(long)
    }

    fn update_edge(&mut self, e: EdgeId, s: StateRef) -> StateRef {
        if s == self.bot {
            return s;
        }
        let ws = Rc::clone(&self.ws);
        let edge = &ws.cfgs.edges[e];
        match edge.kind {
            EdgeKind::LoopExit => {
                let d_src = ws.cfgs.loop_depth(ws.cfgs.loop_of(edge.src)) as isize;
                let d_snk = ws.cfgs.loop_depth(ws.cfgs.loop_of(edge.snk)) as isize;
                let len = self.levels(s).len() as isize;
                let new_len = (len + d_snk - d_src).max(1) as usize;
                self.resize(s, new_len)
            }
            EdgeKind::LoopEntry => {
                let len = self.levels(s).len();
                self.resize(s, len + 1)
            }
            EdgeKind::Flow | EdgeKind::Call => {
                if !ws.cfgs.blocks[edge.src].is_synth() {
                    return s;
                }
                let len = self.levels(s).len();
                match self.depths.get(&edge.src).copied() {
                    None => self.bot,
                    Some(d) if d == len => s,
                    Some(d) => self.resize(s, d),
                }
            }
        }
    }

    fn update_block(&mut self, v: BlockId, s: StateRef) -> StateRef {
        if s == self.bot {
            return s;
        }
        let ws = Rc::clone(&self.ws);
        if ws.cfgs.blocks[v].is_synth() {
            let len = self.levels(s).len();
            self.depths.insert(v, len);
        }
        let mut cur = s;
        for a in &ws.cfgs.blocks[v].accesses {
            if a.touches_set(self.set) {
                cur = self.update_access(a, cur);
            }
        }
        cur
    }

    fn update_access(&mut self, a: &Access, s: StateRef) -> StateRef {
        if s == self.bot || !a.touches_set(self.set) {
            return s;
        }
        let levels = self.levels(s);
        let mut out = Vec::with_capacity(levels.len());
        let mut changed = false;
        for &l in &levels {
            let nl = self.pers.update_access(a, l);
            changed = changed || nl != l;
            out.push(nl);
        }
        if changed {
            self.alloc(out)
        } else {
            s
        }
    }

    fn print(&self, s: StateRef) -> String {
        let mut out = String::from("{ ");
        for (i, &l) in self.levels(s).iter().enumerate() {
            if i != 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("L{}: {}", i, self.pers.print(l)));
        }
        out.push_str(" }");
        out
    }

    fn save(&self, s: StateRef, out: &mut dyn io::Write) -> io::Result<()> {
        let levels = self.levels(s);
        out.write_all(&(levels.len() as u32).to_le_bytes())?;
        for &l in &levels {
            self.pers.save(l, out)?;
        }
        Ok(())
    }

    fn load(&mut self, input: &mut dyn io::Read) -> io::Result<StateRef> {
        let mut depth = [0u8; 4];
        input.read_exact(&mut depth)?;
        let depth = u32::from_le_bytes(depth) as usize;
        let mut levels = Vec::with_capacity(depth);
        for _ in 0..depth {
            levels.push(self.pers.load(input)?);
        }
        Ok(self.alloc(levels))
    }

    fn height(&self) -> usize {
        self.pers.height() * (self.ws.cfgs.loops.len() + 2)
    }

    fn collect(&self, roots: &mut Vec<StateRef>) {
        roots.push(self.bot);
        roots.push(self.top);
        if let Some(os) = self.last {
            roots.push(os);
        }
        self.pers.collect(roots);
    }
}
