//! Timing events for the ILP-based WCET computation.
//!
//! Per (in-edge, access) the builder emits events describing the miss cost
//! the access may incur along that edge: its cost, how often the miss
//! occurs, and an optional linear bound on the miss count. The prefix
//! variant re-evaluates the source block's accesses after that block, for
//! pipeline analyses that separate a block's own cost from its successor
//! edge.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::ops::BitOr;
use std::rc::Rc;

use crate::access::{Access, AccessKind, Action};
use crate::category::{classify, AgePoint, Analyses, Category};
use crate::cfg::{EdgeId, InstId};
use crate::hard::Bank;
use crate::ilp::Expression;
use crate::workspace::Workspace;

/// How often the miss described by an event occurs. The discriminants form
/// a two-bit sum so that per-block occurrences fold with bitwise or.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    NoOccurrence = 0,
    Always = 1,
    Never = 2,
    Sometimes = 3,
}

impl BitOr for Occurrence {
    type Output = Occurrence;

    fn bitor(self, rhs: Occurrence) -> Occurrence {
        match self as u8 | rhs as u8 {
            0 => Occurrence::NoOccurrence,
            1 => Occurrence::Always,
            2 => Occurrence::Never,
            _ => Occurrence::Sometimes,
        }
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Occurrence::NoOccurrence => "no-occurrence",
            Occurrence::Always => "always",
            Occurrence::Never => "never",
            Occurrence::Sometimes => "sometimes",
        };
        f.write_str(s)
    }
}

/// One data-cache timing event attached to an edge.
#[derive(Debug, Clone)]
pub struct Event {
    pub access: Access,
    pub cost: u64,
    pub occurrence: Occurrence,
    pub bound: Expression,
}

impl Event {
    pub fn name(&self) -> &'static str {
        "DC"
    }

    /// True when the event contributes a bound to the ILP objective.
    pub fn is_estimating(&self) -> bool {
        !self.bound.is_empty()
    }

    pub fn detail(&self, ws: &Workspace) -> String {
        let mut s = format!("{}: {} - {}", self.name(), self.access.describe(&ws.cfgs), self.occurrence);
        if self.occurrence == Occurrence::Sometimes {
            if self.bound.is_empty() {
                s.push_str(" (no bound)");
            } else {
                s.push_str(&format!(" (xe <= {})", self.bound.format(&ws.cfgs)));
            }
        }
        s
    }
}

/// Per-edge event lists; `prefix` holds the events of the prefix variant.
#[derive(Debug, Default)]
pub struct EventMaps {
    pub events: HashMap<EdgeId, Vec<Event>>,
    pub prefix: HashMap<EdgeId, Vec<Event>>,
}

impl EventMaps {
    pub fn on(&self, e: EdgeId) -> &[Event] {
        self.events.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn prefix_on(&self, e: EdgeId) -> &[Event] {
        self.prefix.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dump(&self, ws: &Workspace, explicit: bool, out: &mut dyn io::Write) -> io::Result<()> {
        for (_, block) in ws.cfgs.blocks.iter() {
            if !block.is_basic() {
                continue;
            }
            for &e in &block.ins {
                writeln!(out, "\talong {}", ws.cfgs.edge_name(e))?;
                for evt in self.prefix_on(e) {
                    Self::dump_event(ws, "[P]", evt, explicit, out)?;
                }
                for evt in self.on(e) {
                    Self::dump_event(ws, "[B]", evt, explicit, out)?;
                }
            }
        }
        Ok(())
    }

    fn dump_event(
        ws: &Workspace,
        tag: &str,
        evt: &Event,
        explicit: bool,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        if explicit {
            writeln!(out, "\t\t{}{} (cost {})", tag, evt.detail(ws), evt.cost)
        } else {
            writeln!(out, "\t\t{}{}: {} x{}", tag, evt.name(), evt.occurrence, evt.cost)
        }
    }
}

pub struct EventBuilder<'a> {
    ws: Rc<Workspace>,
    an: Analyses<'a>,
}

impl<'a> EventBuilder<'a> {
    pub fn new(ws: Rc<Workspace>, an: Analyses<'a>) -> Self {
        Self { ws, an }
    }

    /// Events at every edge sink.
    pub fn build(&mut self) -> EventMaps {
        let mut maps = EventMaps::default();
        self.fill(&mut maps, false);
        maps
    }

    /// Sink events plus the per-edge prefix list.
    pub fn build_with_prefix(&mut self) -> EventMaps {
        let mut maps = EventMaps::default();
        self.fill(&mut maps, true);
        self.fill(&mut maps, false);
        maps
    }

    fn fill(&mut self, maps: &mut EventMaps, prefix: bool) {
        let ws = Rc::clone(&self.ws);
        for (_, block) in ws.cfgs.blocks.iter() {
            if !block.is_basic() {
                continue;
            }
            for &e in &block.ins {
                let point = if prefix { AgePoint::Source } else { AgePoint::Sink };
                let accesses = if prefix {
                    &ws.cfgs.blocks[ws.cfgs.edges[e].src].accesses
                } else {
                    &block.accesses
                };
                let mut multi: Option<InstId> = None;
                for (k, a) in accesses.iter().enumerate() {
                    if Some(a.inst) == multi {
                        continue;
                    }
                    if self.process_access(maps, prefix, point, e, k, a) {
                        multi = Some(a.inst);
                    }
                }
            }
        }
    }

    fn push(maps: &mut EventMaps, prefix: bool, e: EdgeId, evt: Event) {
        let map = if prefix { &mut maps.prefix } else { &mut maps.events };
        map.entry(e).or_default().push(evt);
    }

    fn worst_access_time(&self, a: &Access) -> u64 {
        match a.action {
            Action::Load | Action::DirectLoad => self.ws.memory().worst_read_time(),
            Action::Store | Action::DirectStore => self.ws.memory().worst_write_time(),
            Action::NoAccess | Action::Purge => 0,
        }
    }

    fn bank_latency(a: &Access, bank: &Bank) -> u64 {
        match a.action {
            Action::Load | Action::DirectLoad => bank.read_latency,
            _ => bank.write_latency,
        }
    }

    fn occurrence_of(c: Category) -> Occurrence {
        match c {
            Category::Ah => Occurrence::Never,
            Category::Am => Occurrence::Always,
            Category::Pe | Category::Nc => Occurrence::Sometimes,
        }
    }

    /// Unknown target: an unbounded sometimes-miss at the worst time.
    fn process_any(&self, a: &Access) -> Event {
        Event {
            access: a.clone(),
            cost: self.worst_access_time(a),
            occurrence: Occurrence::Sometimes,
            bound: Expression::new(),
        }
    }

    fn process_block(&mut self, point: AgePoint, e: EdgeId, k: usize, a: &Access) -> Event {
        let cb = match &a.kind {
            AccessKind::Block(cb) => Rc::clone(cb),
            _ => panic!("block event on a non-BLOCK access"),
        };
        let (cat, scope) = classify(&self.ws, &mut self.an, point, e, k, &cb);
        let mut bound = Expression::new();
        if let Some(h) = scope {
            bound.add(1, h);
        }
        let cost = if cat == Category::Ah {
            Self::bank_latency(a, cb.bank())
        } else {
            self.worst_access_time(a)
        };
        Event { access: a.clone(), cost, occurrence: Self::occurrence_of(cat), bound }
    }

    fn process_enum(&mut self, point: AgePoint, e: EdgeId, k: usize, a: &Access) -> Event {
        let blocks = a.blocks().to_vec();
        let mut occ = Occurrence::NoOccurrence;
        let mut bound = Expression::new();
        for cb in &blocks {
            let (cat, scope) = classify(&self.ws, &mut self.an, point, e, k, cb);
            let o = Self::occurrence_of(cat);
            occ = occ | o;
            match scope {
                Some(h) => bound.add(1, h),
                // an unbounded sometimes-miss poisons the whole access
                None if o == Occurrence::Sometimes => return self.process_any(a),
                None => {}
            }
        }
        let cost = if occ == Occurrence::Never {
            Self::bank_latency(a, blocks[0].bank())
        } else {
            self.worst_access_time(a)
        };
        Event { access: a.clone(), cost, occurrence: occ, bound }
    }

    /// Non-cached access: the miss always happens, at the bank's latency
    /// when the bank is known.
    fn process_direct(&self, a: &Access) -> Event {
        let cost = match &a.kind {
            AccessKind::Any | AccessKind::Range { .. } => self.worst_access_time(a),
            AccessKind::Block(cb) => Self::bank_latency(a, cb.bank()),
            AccessKind::Enum { blocks, .. } => Self::bank_latency(a, blocks[0].bank()),
        };
        Event { access: a.clone(), cost, occurrence: Occurrence::Always, bound: Expression::new() }
    }

    /// Multi-access instruction with an unknown target: one event per
    /// cache line the burst may touch, plus one for misalignment.
    fn process_multi_top(&mut self, maps: &mut EventMaps, prefix: bool, e: EdgeId, a: &Access) {
        let access_size = match a.width {
            Some(w) if w > 0 => w as u64,
            _ => 4,
        };
        let count = self.ws.cfgs.insts[a.inst].multi_count as u64;
        let size = count * access_size;
        let cache = self.ws.cache();
        let n = ((size + cache.block_size as u64 - 1) >> cache.block_bits()) + 1;
        let t = self.worst_access_time(a);
        for _ in 0..n {
            Self::push(
                maps,
                prefix,
                e,
                Event {
                    access: a.clone(),
                    cost: t,
                    occurrence: Occurrence::Sometimes,
                    bound: Expression::new(),
                },
            );
        }
    }

    /// Emit the events of one access; returns true when a multi-access
    /// burst was expanded and the instruction's remaining accesses must be
    /// suppressed.
    fn process_access(
        &mut self,
        maps: &mut EventMaps,
        prefix: bool,
        point: AgePoint,
        e: EdgeId,
        k: usize,
        a: &Access,
    ) -> bool {
        match a.action {
            Action::NoAccess | Action::Purge => false,
            Action::DirectLoad | Action::DirectStore => {
                let evt = self.process_direct(a);
                Self::push(maps, prefix, e, evt);
                false
            }
            Action::Load | Action::Store => match &a.kind {
                AccessKind::Any => {
                    if self.ws.cfgs.insts[a.inst].is_multi() {
                        self.process_multi_top(maps, prefix, e, a);
                        true
                    } else {
                        let evt = self.process_any(a);
                        Self::push(maps, prefix, e, evt);
                        false
                    }
                }
                AccessKind::Range { .. } => {
                    let evt = self.process_any(a);
                    Self::push(maps, prefix, e, evt);
                    false
                }
                AccessKind::Block(_) => {
                    let evt = self.process_block(point, e, k, a);
                    Self::push(maps, prefix, e, evt);
                    false
                }
                AccessKind::Enum { .. } => {
                    let evt = self.process_enum(point, e, k, a);
                    Self::push(maps, prefix, e, evt);
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SetCollection;
    use crate::analysis::{AcsAnalysis, AcsAnalysisKind, AnalysisConfig, MultiPersAnalysis};
    use crate::cfg::{BlockId, CfgCollection, EdgeKind};
    use crate::testkit;

    struct LoopWs {
        ws: Rc<Workspace>,
        h: BlockId,
        body_in: EdgeId,
    }

    fn loop_ws() -> LoopWs {
        let mut coll = SetCollection::new(testkit::cache(), testkit::memory());
        let blk = coll.add(0x100).unwrap();

        let mut cfgs = CfgCollection::new();
        let main = cfgs.add_cfg("main");
        let pre = cfgs.add_block(main, "pre");
        let h = cfgs.add_block(main, "h");
        let body = cfgs.add_block(main, "body");
        let tail = cfgs.add_block(main, "tail");
        let l1 = cfgs.add_loop(main, h, None);
        cfgs.assign_loop(body, l1);
        cfgs.add_edge(cfgs.entry_of(main), pre, EdgeKind::Flow);
        cfgs.add_edge(pre, h, EdgeKind::LoopEntry);
        let body_in = cfgs.add_edge(h, body, EdgeKind::Flow);
        cfgs.add_edge(body, h, EdgeKind::Flow);
        cfgs.add_edge(h, tail, EdgeKind::LoopExit);
        cfgs.add_edge(tail, cfgs.exit_of(main), EdgeKind::Flow);
        let i1 = cfgs.inst_at(0x8000, 0);
        let i2 = cfgs.inst_at(0x8004, 0);
        cfgs.set_accesses(
            body,
            vec![
                Access::block(i1, Action::Load, blk.clone(), None, 0),
                Access::block(i2, Action::Load, blk, None, 0),
            ],
        );

        LoopWs { ws: Workspace::new(cfgs, coll), h, body_in }
    }

    fn run_all(ws: &Rc<Workspace>) -> (AcsAnalysis, AcsAnalysis, AcsAnalysis, MultiPersAnalysis) {
        let cfg = AnalysisConfig::default();
        let mut must = AcsAnalysis::new(AcsAnalysisKind::Must, Rc::clone(ws), &cfg).unwrap();
        let mut may = AcsAnalysis::new(AcsAnalysisKind::May, Rc::clone(ws), &cfg).unwrap();
        let mut pers = AcsAnalysis::new(AcsAnalysisKind::Pers, Rc::clone(ws), &cfg).unwrap();
        let mut mp = MultiPersAnalysis::new(Rc::clone(ws), &cfg).unwrap();
        must.run().unwrap();
        may.run().unwrap();
        pers.run().unwrap();
        mp.run().unwrap();
        (must, may, pers, mp)
    }

    #[test]
    fn persistent_and_hit_events_in_a_loop() {
        let fx = loop_ws();
        let (mut must, mut may, mut pers, mut mp) = run_all(&fx.ws);
        let an = Analyses {
            must: &mut must,
            may: Some(&mut may),
            pers: Some(&mut pers),
            multi_pers: Some(&mut mp),
        };
        let maps = EventBuilder::new(Rc::clone(&fx.ws), an).build();
        let evts = maps.on(fx.body_in);
        assert_eq!(evts.len(), 2);

        // first access: persistent, bounded by the loop header count
        assert_eq!(evts[0].occurrence, Occurrence::Sometimes);
        assert_eq!(evts[0].cost, 10);
        assert_eq!(evts[0].bound.terms().len(), 1);
        assert_eq!(evts[0].bound.terms()[0].var, fx.h);
        assert_eq!(evts[0].bound.terms()[0].coef, 1);
        assert!(evts[0].is_estimating());

        // second access: always hit, reserved at the bank read latency
        assert_eq!(evts[1].occurrence, Occurrence::Never);
        assert_eq!(evts[1].cost, 1);
        assert!(!evts[1].is_estimating());
    }

    #[test]
    fn multi_access_burst_to_unknown_address() {
        let mut coll = SetCollection::new(testkit::cache(), testkit::memory());
        coll.add(0x100).unwrap();

        let mut cfgs = CfgCollection::new();
        let main = cfgs.add_cfg("main");
        let v = cfgs.add_block(main, "v");
        let e = cfgs.add_edge(cfgs.entry_of(main), v, EdgeKind::Flow);
        cfgs.add_edge(v, cfgs.exit_of(main), EdgeKind::Flow);
        let i = cfgs.inst_at(0x8000, 10);
        cfgs.set_accesses(
            v,
            vec![
                Access::any(i, Action::Load, Some(4), 0),
                Access::any(i, Action::Load, Some(4), 1),
            ],
        );
        let ws = Workspace::new(cfgs, coll);

        let (mut must, _, _, _) = run_all(&ws);
        let an = Analyses { must: &mut must, may: None, pers: None, multi_pers: None };
        let maps = EventBuilder::new(Rc::clone(&ws), an).build();
        // 10 accesses of 4 bytes over 16-byte lines: ceil(40/16)+1 events,
        // and the instruction's second access is suppressed
        let evts = maps.on(e);
        assert_eq!(evts.len(), 4);
        assert!(evts.iter().all(|x| x.occurrence == Occurrence::Sometimes));
        assert!(evts.iter().all(|x| x.cost == 10));
        assert!(evts.iter().all(|x| x.bound.is_empty()));
    }

    #[test]
    fn direct_store_uses_the_bank_latency() {
        let mut coll = SetCollection::new(testkit::cache(), testkit::memory());
        let io = coll.add(0xff00_0000).unwrap();
        assert!(!io.is_cached());
        coll.add(0x100).unwrap();

        let mut cfgs = CfgCollection::new();
        let main = cfgs.add_cfg("main");
        let v = cfgs.add_block(main, "v");
        let e = cfgs.add_edge(cfgs.entry_of(main), v, EdgeKind::Flow);
        cfgs.add_edge(v, cfgs.exit_of(main), EdgeKind::Flow);
        let i = cfgs.inst_at(0x8000, 0);
        cfgs.set_accesses(v, vec![Access::block(i, Action::DirectStore, io, None, 0)]);
        let ws = Workspace::new(cfgs, coll);

        let (mut must, _, _, _) = run_all(&ws);
        let an = Analyses { must: &mut must, may: None, pers: None, multi_pers: None };
        let maps = EventBuilder::new(Rc::clone(&ws), an).build();
        let evts = maps.on(e);
        assert_eq!(evts.len(), 1);
        assert_eq!(evts[0].occurrence, Occurrence::Always);
        assert_eq!(evts[0].cost, 6);
    }

    #[test]
    fn prefix_events_cover_the_source_block() {
        let fx = loop_ws();
        let (mut must, mut may, mut pers, mut mp) = run_all(&fx.ws);
        let an = Analyses {
            must: &mut must,
            may: Some(&mut may),
            pers: Some(&mut pers),
            multi_pers: Some(&mut mp),
        };
        let maps = EventBuilder::new(Rc::clone(&fx.ws), an).build_with_prefix();
        // the body's back edge carries the body accesses as prefix events
        let back = fx.ws.cfgs.blocks[fx.h]
            .ins
            .iter()
            .copied()
            .find(|&e| fx.ws.cfgs.edges[e].kind == EdgeKind::Flow)
            .unwrap();
        assert_eq!(maps.prefix_on(back).len(), 2);
        assert!(!maps.on(fx.body_in).is_empty());
    }

    #[test]
    fn occurrence_or_matches_the_sum_type() {
        use Occurrence::*;
        assert_eq!(Always | Never, Sometimes);
        assert_eq!(NoOccurrence | Always, Always);
        assert_eq!(NoOccurrence | Never, Never);
        assert_eq!(Sometimes | Always, Sometimes);
    }
}
