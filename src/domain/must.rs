//! MUST analysis: upper bound on block ages.
//!
//! If a block's MUST age is below the associativity at a program point, the
//! block is guaranteed to be in the cache there; such accesses are
//! Always-Hit.

use std::io;
use std::rc::Rc;

use crate::access::{Access, AccessKind, Action};
use crate::acs::arena::StateRef;
use crate::cfg::{BlockId, EdgeId};
use crate::domain::{AcsBase, ArenaRef, Domain};
use crate::workspace::Workspace;

pub struct Must {
    base: AcsBase,
}

impl Must {
    pub fn new(ws: Rc<Workspace>, arena: ArenaRef, set: usize, assoc: usize) -> Self {
        let top_init = assoc as u8;
        Self { base: AcsBase::new(ws, arena, set, assoc, top_init) }
    }

    fn access(&mut self, is: StateRef, b: usize) -> StateRef {
        if is == self.base.bot {
            return is;
        }
        let os = self.base.make(0);
        {
            let mut ar = self.base.arena.borrow_mut();
            let (src, dst) = ar.acs_pair(is, os);
            let ba = src.age[b];
            let a = self.base.assoc;
            for i in 0..src.len() {
                dst.age[i] = if src.age[i] <= ba && src.age[i] != a {
                    src.age[i] + 1
                } else {
                    src.age[i]
                };
            }
            dst.age[b] = 0;
        }
        self.base.last = Some(os);
        os
    }

    fn purge(&mut self, is: StateRef, b: usize) -> StateRef {
        let os = self.base.copy(is);
        self.base.arena.borrow_mut().acs_mut(os).age[b] = self.base.assoc;
        if self.base.sum(os) == self.base.sum_a {
            return self.base.top;
        }
        self.base.last = Some(os);
        os
    }

    fn access_any(&mut self, is: StateRef) -> StateRef {
        let os = self.base.make(0);
        let mut sum = 0u32;
        {
            let mut ar = self.base.arena.borrow_mut();
            let (src, dst) = ar.acs_pair(is, os);
            let a = self.base.assoc;
            for i in 0..src.len() {
                dst.age[i] = (src.age[i] + 1).min(a);
                sum += dst.age[i] as u32;
            }
        }
        if sum == self.base.sum_a {
            return self.base.top;
        }
        self.base.last = Some(os);
        os
    }
}

impl Domain for Must {
    fn set(&self) -> usize {
        self.base.set
    }

    fn bot(&self) -> StateRef {
        self.base.bot
    }

    fn top(&self) -> StateRef {
        self.base.top
    }

    fn entry(&self) -> StateRef {
        self.base.top
    }

    fn equals(&self, s1: StateRef, s2: StateRef) -> bool {
        self.base.equals(s1, s2)
    }

    fn join(&mut self, s1: StateRef, s2: StateRef) -> StateRef {
        if s1 == self.base.bot {
            return s2;
        }
        if s2 == self.base.bot {
            return s1;
        }
        if s1 == self.base.top || s2 == self.base.top {
            return self.base.top;
        }
        let os = self.base.make(0);
        let mut sum = 0u32;
        {
            let mut ar = self.base.arena.borrow_mut();
            let n = self.base.n;
            for i in 0..n {
                let m = ar.acs(s1).age[i].max(ar.acs(s2).age[i]);
                ar.acs_mut(os).age[i] = m;
                sum += m as u32;
            }
        }
        if sum == self.base.sum_a {
            return self.base.top;
        }
        self.base.last = Some(os);
        os
    }

    fn update_edge(&mut self, _e: EdgeId, s: StateRef) -> StateRef {
        s
    }

    fn update_block(&mut self, v: BlockId, s: StateRef) -> StateRef {
        if s == self.base.bot {
            return s;
        }
        let ws = Rc::clone(&self.base.ws);
        let mut cur = s;
        for a in &ws.cfgs.blocks[v].accesses {
            if a.touches_set(self.base.set) {
                cur = self.update_access(a, cur);
            }
        }
        cur
    }

    fn update_access(&mut self, a: &Access, s: StateRef) -> StateRef {
        if !a.touches_set(self.base.set) || s == self.base.bot {
            return s;
        }
        match a.action {
            Action::Load | Action::Store => match &a.kind {
                AccessKind::Any | AccessKind::Range { .. } => self.access_any(s),
                AccessKind::Block(cb) => self.access(s, cb.index()),
                AccessKind::Enum { .. } => match a.block_in(self.base.set) {
                    Some(cb) => {
                        let b = cb.index();
                        self.access(s, b)
                    }
                    None => s,
                },
            },
            Action::Purge => match &a.kind {
                AccessKind::Any | AccessKind::Range { .. } => self.base.top,
                AccessKind::Block(cb) => self.purge(s, cb.index()),
                AccessKind::Enum { .. } => match a.block_in(self.base.set) {
                    Some(cb) => {
                        let b = cb.index();
                        self.purge(s, b)
                    }
                    None => s,
                },
            },
            Action::NoAccess | Action::DirectLoad | Action::DirectStore => s,
        }
    }

    fn print(&self, s: StateRef) -> String {
        self.base.print(s)
    }

    fn save(&self, s: StateRef, out: &mut dyn io::Write) -> io::Result<()> {
        self.base.save(s, out)
    }

    fn load(&mut self, input: &mut dyn io::Read) -> io::Result<StateRef> {
        self.base.load(input)
    }

    fn height(&self) -> usize {
        self.base.height()
    }

    fn collect(&self, roots: &mut Vec<StateRef>) {
        self.base.collect(roots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    fn ages(dom: &Must, s: StateRef) -> Vec<u8> {
        dom.base.arena.borrow().acs(s).age.to_vec()
    }

    #[test]
    fn entry_is_top_and_access_rejuvenates() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140, 0x180]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let a0 = testkit::load(&fx, 0);
        let s = dom.update_access(&a0, dom.entry());
        assert_eq!(ages(&dom, s), vec![0, 2, 2]);
        let a1 = testkit::load(&fx, 1);
        let s = dom.update_access(&a1, s);
        assert_eq!(ages(&dom, s), vec![1, 0, 2]);
        // re-access of block 0 ages only the younger block 1
        let s = dom.update_access(&a0, s);
        assert_eq!(ages(&dom, s), vec![0, 1, 2]);
    }

    #[test]
    fn aging_saturates_at_assoc() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140, 0x180]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let mut s = dom.entry();
        for k in 0..3 {
            s = dom.update_access(&testkit::load(&fx, k), s);
        }
        // block 0 was evicted by the two younger ones
        assert_eq!(ages(&dom, s), vec![2, 1, 0]);
    }

    #[test]
    fn join_is_pointwise_max_with_bot_identity() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let s1 = dom.update_access(&testkit::load(&fx, 0), dom.entry());
        let s2 = dom.update_access(&testkit::load(&fx, 1), dom.entry());
        assert_eq!(dom.join(dom.bot(), s1), s1);
        assert_eq!(dom.join(s1, dom.bot()), s1);
        let j = dom.join(s1, s2);
        // 0 ⊔ 2 and 2 ⊔ 0: nothing provably cached
        assert_eq!(j, dom.top());
        let s3 = dom.update_access(&testkit::load(&fx, 1), s1);
        let j = dom.join(s1, s3);
        assert_eq!(ages(&dom, j), vec![1, 2]);
    }

    #[test]
    fn unknown_access_ages_everything() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let s = dom.update_access(&testkit::load(&fx, 0), dom.entry());
        let any = testkit::load_any(&fx);
        let s = dom.update_access(&any, s);
        assert_eq!(ages(&dom, s), vec![1, 2]);
        let s = dom.update_access(&any, s);
        // saturation reaches TOP
        assert_eq!(s, dom.top());
    }

    #[test]
    fn purge_is_idempotent() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let s = dom.update_access(&testkit::load(&fx, 0), dom.entry());
        let p = testkit::purge(&fx, 0);
        let s1 = dom.update_access(&p, s);
        let s2 = dom.update_access(&p, s1);
        assert!(dom.equals(s1, s2));
    }

    #[test]
    fn save_load_round_trip() {
        let fx = testkit::same_set_blocks(&[0x100, 0x140]);
        let mut dom = Must::new(fx.ws.clone(), fx.arena.clone(), fx.set, 2);
        let s = dom.update_access(&testkit::load(&fx, 0), dom.entry());
        let mut buf = Vec::new();
        dom.save(s, &mut buf).unwrap();
        let r = dom.load(&mut buf.as_slice()).unwrap();
        assert!(dom.equals(s, r));
    }
}
