//! Mark-sweep arena for abstract cache states.
//!
//! Transfer functions allocate freely and share states pervasively, so
//! states live in a slot arena addressed by `StateRef` handles. Domains and
//! solvers mark the states they still reach; `sweep` destructs everything
//! else and returns the slots to the free list. Collection only runs at
//! analysis cleanup.

use super::{Acs, Age};

/// Handle to a state slot. Plain index, cheap to copy and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateRef(u32);

impl StateRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stack of per-loop-level states used by the multi-level persistence
/// analysis; outermost level at index 0.
#[derive(Debug)]
pub struct MultiAcs {
    pub levels: Vec<StateRef>,
}

#[derive(Debug)]
pub enum StateNode {
    Acs(Acs),
    Multi(MultiAcs),
}

#[derive(Debug)]
enum Slot {
    Free(Option<u32>),
    Used { marked: bool, node: StateNode },
}

#[derive(Debug, Default)]
pub struct StateArena {
    slots: Vec<Slot>,
    free: Option<u32>,
}

impl StateArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, node: StateNode) -> StateRef {
        match self.free {
            Some(i) => {
                let next = match self.slots[i as usize] {
                    Slot::Free(next) => next,
                    Slot::Used { .. } => panic!("corrupted ACS free list"),
                };
                self.free = next;
                self.slots[i as usize] = Slot::Used { marked: false, node };
                StateRef(i)
            }
            None => {
                self.slots.push(Slot::Used { marked: false, node });
                StateRef((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn alloc_acs(&mut self, n: usize, init: Age) -> StateRef {
        self.alloc(StateNode::Acs(Acs::new(n, init)))
    }

    pub fn alloc_acs_from(&mut self, acs: Acs) -> StateRef {
        self.alloc(StateNode::Acs(acs))
    }

    /// Fresh copy of an existing ACS slot.
    pub fn alloc_copy(&mut self, r: StateRef) -> StateRef {
        let copy = self.acs(r).clone();
        self.alloc(StateNode::Acs(copy))
    }

    pub fn alloc_multi(&mut self, levels: Vec<StateRef>) -> StateRef {
        self.alloc(StateNode::Multi(MultiAcs { levels }))
    }

    fn node(&self, r: StateRef) -> &StateNode {
        match &self.slots[r.index()] {
            Slot::Used { node, .. } => node,
            Slot::Free(_) => panic!("dangling ACS reference"),
        }
    }

    pub fn acs(&self, r: StateRef) -> &Acs {
        match self.node(r) {
            StateNode::Acs(a) => a,
            StateNode::Multi(_) => panic!("expected an ACS, found a multi-ACS"),
        }
    }

    pub fn acs_mut(&mut self, r: StateRef) -> &mut Acs {
        match &mut self.slots[r.index()] {
            Slot::Used { node: StateNode::Acs(a), .. } => a,
            Slot::Used { .. } => panic!("expected an ACS, found a multi-ACS"),
            Slot::Free(_) => panic!("dangling ACS reference"),
        }
    }

    pub fn multi(&self, r: StateRef) -> &MultiAcs {
        match self.node(r) {
            StateNode::Multi(m) => m,
            StateNode::Acs(_) => panic!("expected a multi-ACS, found an ACS"),
        }
    }

    /// Borrow a source ACS and a distinct destination ACS at once, for
    /// transfer functions that read one state while filling another.
    pub fn acs_pair(&mut self, src: StateRef, dst: StateRef) -> (&Acs, &mut Acs) {
        assert_ne!(src, dst, "acs_pair needs distinct slots");
        let (a, b) = (src.index(), dst.index());
        let (src_slot, dst_slot) = if a < b {
            let (lo, hi) = self.slots.split_at_mut(b);
            (&lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a);
            (&hi[0], &mut lo[b])
        };
        let src_acs = match src_slot {
            Slot::Used { node: StateNode::Acs(x), .. } => x,
            _ => panic!("dangling or non-ACS source state"),
        };
        let dst_acs = match dst_slot {
            Slot::Used { node: StateNode::Acs(x), .. } => x,
            _ => panic!("dangling or non-ACS destination state"),
        };
        (src_acs, dst_acs)
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Used { .. })).count()
    }

    /// Mark a state (and, for a multi-ACS, every nested level) as reachable.
    pub fn mark(&mut self, r: StateRef) {
        let mut work = vec![r];
        while let Some(cur) = work.pop() {
            match &mut self.slots[cur.index()] {
                Slot::Used { marked, node } => {
                    if *marked {
                        continue;
                    }
                    *marked = true;
                    if let StateNode::Multi(m) = node {
                        work.extend_from_slice(&m.levels);
                    }
                }
                Slot::Free(_) => panic!("marking a dangling ACS reference"),
            }
        }
    }

    /// Free every unmarked slot and clear the marks. Returns the number of
    /// collected states.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for i in 0..self.slots.len() {
            let keep = match &mut self.slots[i] {
                Slot::Used { marked, .. } => {
                    let m = *marked;
                    *marked = false;
                    m
                }
                Slot::Free(_) => continue,
            };
            if !keep {
                self.slots[i] = Slot::Free(self.free);
                self.free = Some(i as u32);
                freed += 1;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acs::BOT_AGE;

    #[test]
    fn alloc_and_read_back() {
        let mut arena = StateArena::new();
        let a = arena.alloc_acs(3, 0);
        let b = arena.alloc_acs(3, BOT_AGE);
        assert_ne!(a, b);
        assert_eq!(arena.acs(a).age[0], 0);
        assert_eq!(arena.acs(b).age[2], BOT_AGE);
        arena.acs_mut(a).age[1] = 7;
        assert_eq!(arena.acs(a).age[1], 7);
    }

    #[test]
    fn pair_borrow_both_orders() {
        let mut arena = StateArena::new();
        let a = arena.alloc_acs(2, 1);
        let b = arena.alloc_acs(2, 0);
        {
            let (src, dst) = arena.acs_pair(a, b);
            dst.age[0] = src.age[0] + 1;
        }
        assert_eq!(arena.acs(b).age[0], 2);
        {
            let (src, dst) = arena.acs_pair(b, a);
            dst.age[1] = src.age[0];
        }
        assert_eq!(arena.acs(a).age[1], 2);
    }

    #[test]
    fn sweep_collects_unmarked_and_reuses_slots() {
        let mut arena = StateArena::new();
        let keep = arena.alloc_acs(2, 0);
        let drop1 = arena.alloc_acs(2, 1);
        let drop2 = arena.alloc_acs(2, 2);
        assert_eq!(arena.live(), 3);
        arena.mark(keep);
        assert_eq!(arena.sweep(), 2);
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.acs(keep).age[0], 0);
        // the freed slots come back before the arena grows
        let r1 = arena.alloc_acs(2, 9);
        let r2 = arena.alloc_acs(2, 9);
        assert!(r1.index() == drop1.index() || r1.index() == drop2.index());
        assert!(r2.index() == drop1.index() || r2.index() == drop2.index());
        assert_eq!(arena.live(), 3);
    }

    #[test]
    fn marking_a_multi_keeps_its_levels() {
        let mut arena = StateArena::new();
        let l0 = arena.alloc_acs(2, 0);
        let l1 = arena.alloc_acs(2, BOT_AGE);
        let m = arena.alloc_multi(vec![l0, l1]);
        let stray = arena.alloc_acs(2, 3);
        arena.mark(m);
        assert_eq!(arena.sweep(), 1);
        assert_eq!(arena.multi(m).levels, vec![l0, l1]);
        assert_eq!(arena.acs(l1).age[0], BOT_AGE);
        let _ = stray; // collected
    }
}
