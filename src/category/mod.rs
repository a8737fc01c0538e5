//! Category classifier.
//!
//! Combines the finished analyses into one category per (in-edge, access,
//! cache-block) triple: Always-Hit, Persistent (with its scope anchor),
//! Always-Miss or Not-Classified. The scope anchor of a persistent access
//! is the block whose execution count bounds its miss count, usually a
//! loop header.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::rc::Rc;

use crate::access::{AccessKind, Action, CacheBlock};
use crate::acs::Age;
use crate::analysis::{AcsAnalysis, AgeInfo, MultiAgeInfo, MultiPersAnalysis};
use crate::cfg::{BlockId, EdgeId, LoopId};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Ah,
    Am,
    Pe,
    Nc,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Ah => "AH",
            Category::Am => "AM",
            Category::Pe => "PE",
            Category::Nc => "NC",
        };
        f.write_str(s)
    }
}

/// The analyses available for classification. MUST is mandatory, the rest
/// refine the result when present.
pub struct Analyses<'a> {
    pub must: &'a mut AcsAnalysis,
    pub may: Option<&'a mut AcsAnalysis>,
    pub pers: Option<&'a mut AcsAnalysis>,
    pub multi_pers: Option<&'a mut MultiPersAnalysis>,
}

/// Where an edge's age queries are answered: at the edge sink (regular
/// events) or after the edge's source block (prefix events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgePoint {
    Sink,
    Source,
}

fn event_block(ws: &Workspace, point: AgePoint, e: EdgeId) -> BlockId {
    let edge = &ws.cfgs.edges[e];
    match point {
        AgePoint::Sink => edge.snk,
        AgePoint::Source => edge.src,
    }
}

impl<'a> Analyses<'a> {
    fn must_age(&mut self, ws: &Workspace, point: AgePoint, e: EdgeId, k: usize, cb: &CacheBlock) -> Age {
        match point {
            AgePoint::Sink => self.must.age_along(e, k, cb),
            AgePoint::Source => self.must.age_at(ws.cfgs.edges[e].src, k, cb),
        }
    }

    fn may_age(&mut self, ws: &Workspace, point: AgePoint, e: EdgeId, k: usize, cb: &CacheBlock) -> Option<Age> {
        let may = self.may.as_mut()?;
        Some(match point {
            AgePoint::Sink => may.age_along(e, k, cb),
            AgePoint::Source => may.age_at(ws.cfgs.edges[e].src, k, cb),
        })
    }

    fn pers_age(&mut self, ws: &Workspace, point: AgePoint, e: EdgeId, k: usize, cb: &CacheBlock) -> Option<Age> {
        let pers = self.pers.as_mut()?;
        Some(match point {
            AgePoint::Sink => pers.age_along(e, k, cb),
            AgePoint::Source => pers.age_at(ws.cfgs.edges[e].src, k, cb),
        })
    }

    fn mpers_level(&mut self, ws: &Workspace, point: AgePoint, e: EdgeId, k: usize, cb: &CacheBlock) -> Option<usize> {
        let mp = self.multi_pers.as_mut()?;
        Some(match point {
            AgePoint::Sink => mp.level_along(e, k, cb),
            AgePoint::Source => mp.level_at(ws.cfgs.edges[e].src, k, cb),
        })
    }
}

/// Scope anchor of a loop: its header, or the first executed block of the
/// CFG when the loop is the procedure top.
fn scope_anchor(ws: &Workspace, l: LoopId) -> BlockId {
    match ws.cfgs.loops[l].header {
        Some(h) => h,
        None => ws.cfgs.entry_successor(ws.cfgs.loops[l].cfg),
    }
}

/// Walk `n − 1` loop levels outward for a MultiPERS level `n`. At a
/// procedure top the walk crosses into the caller, but only when exactly
/// one caller exists; otherwise it stops early, which under-approximates
/// the scope and stays sound.
///
/// The caller check stays pinned to the edge's sink CFG for the whole
/// walk, even after a crossing has moved the current loop into a caller.
/// A second crossing therefore re-follows the sink CFG's unique call
/// site instead of climbing further up the call chain.
fn mpers_scope(ws: &Workspace, point: AgePoint, e: EdgeId, n: usize) -> BlockId {
    let mut l = ws.cfgs.loop_of(event_block(ws, point, e));
    let sink_cfg = ws.cfgs.blocks[ws.cfgs.edges[e].snk].cfg;
    for _ in 1..n {
        if !ws.cfgs.is_top(l) {
            l = ws.cfgs.loops[l].parent.expect("non-top loop without parent");
        } else {
            let callers = &ws.cfgs.cfgs[sink_cfg].callers;
            if callers.len() == 1 {
                l = ws.cfgs.loop_of(callers[0]);
            } else {
                break;
            }
        }
    }
    scope_anchor(ws, l)
}

/// Outermost non-top loop containing the event block (the whole-CFG scope
/// of the single-level persistence analysis).
fn pers_scope(ws: &Workspace, point: AgePoint, e: EdgeId) -> BlockId {
    let mut l = ws.cfgs.loop_of(event_block(ws, point, e));
    if !ws.cfgs.is_top(l) {
        loop {
            let p = ws.cfgs.loops[l].parent.expect("non-top loop without parent");
            if ws.cfgs.is_top(p) {
                break;
            }
            l = p;
        }
    }
    scope_anchor(ws, l)
}

/// Classify one (edge, access, cache-block) triple.
pub fn classify(
    ws: &Workspace,
    an: &mut Analyses,
    point: AgePoint,
    e: EdgeId,
    k: usize,
    cb: &Rc<CacheBlock>,
) -> (Category, Option<BlockId>) {
    let a = an.must.way_count() as Age;

    // sets excluded from the analysis degrade to NC
    if !an.must.is_processed(cb.set()) {
        return (Category::Nc, None);
    }

    if an.must_age(ws, point, e, k, cb) < a {
        return (Category::Ah, None);
    }

    if let Some(n) = an.mpers_level(ws, point, e, k, cb) {
        if n != 0 {
            return (Category::Pe, Some(mpers_scope(ws, point, e, n)));
        }
    }

    if let Some(age) = an.pers_age(ws, point, e, k, cb) {
        if age < a {
            return (Category::Pe, Some(pers_scope(ws, point, e)));
        }
    }

    if let Some(age) = an.may_age(ws, point, e, k, cb) {
        if age >= a {
            return (Category::Am, None);
        }
    }

    (Category::Nc, None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryInfo {
    pub category: Category,
    pub scope: Option<BlockId>,
}

/// Category per (in-edge, access position in the sink block).
#[derive(Debug, Default)]
pub struct CategoryMap {
    map: HashMap<(EdgeId, usize), CategoryInfo>,
}

impl CategoryMap {
    pub fn get(&self, e: EdgeId, k: usize) -> Option<CategoryInfo> {
        self.map.get(&(e, k)).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn dump(&self, ws: &Workspace, out: &mut dyn io::Write) -> io::Result<()> {
        for (_, block) in ws.cfgs.blocks.iter() {
            if !block.is_basic() {
                continue;
            }
            for &e in &block.ins {
                writeln!(out, "\talong {}", ws.cfgs.edge_name(e))?;
                for (k, a) in block.accesses.iter().enumerate() {
                    if let Some(info) = self.get(e, k) {
                        let mut line = format!("\t\t{}: {}", a.describe(&ws.cfgs), info.category);
                        if let Some(h) = info.scope {
                            line.push_str(&format!(" ({})", ws.cfgs.blocks[h].name));
                        }
                        writeln!(out, "{}", line)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fold the per-block categories of an ENUM access: agreement wins, any
/// disagreement degrades to NC. Persistent anchors keep the innermost
/// along the walked path.
fn fold_enum(
    ws: &Workspace,
    an: &mut Analyses,
    e: EdgeId,
    k: usize,
    blocks: &[Rc<CacheBlock>],
) -> CategoryInfo {
    let mut cat: Option<Category> = None;
    let mut anchor: Option<BlockId> = None;
    for cb in blocks {
        let (nc, h) = classify(ws, an, AgePoint::Sink, e, k, cb);
        match cat {
            None => cat = Some(nc),
            Some(c) if c != nc => {
                cat = Some(Category::Nc);
                anchor = None;
                break;
            }
            _ => {}
        }
        if nc == Category::Pe {
            match (anchor, h) {
                (None, Some(new)) => anchor = Some(new),
                (Some(old), Some(new)) => {
                    if !ws.cfgs.includes(ws.cfgs.loop_of(new), ws.cfgs.loop_of(old)) {
                        anchor = Some(new);
                    }
                }
                _ => {}
            }
        }
    }
    let category = cat.unwrap_or(Category::Nc);
    CategoryInfo { category, scope: if category == Category::Pe { anchor } else { None } }
}

/// Compute the category of every access along every in-edge of its block.
pub fn build_categories(ws: &Rc<Workspace>, an: &mut Analyses) -> CategoryMap {
    let mut map = HashMap::new();
    for (_, block) in ws.cfgs.blocks.iter() {
        if !block.is_basic() {
            continue;
        }
        for &e in &block.ins {
            for (k, a) in block.accesses.iter().enumerate() {
                let info = match a.action {
                    Action::NoAccess | Action::Purge => continue,
                    Action::DirectLoad | Action::DirectStore => {
                        CategoryInfo { category: Category::Am, scope: None }
                    }
                    Action::Load | Action::Store => match &a.kind {
                        AccessKind::Any | AccessKind::Range { .. } => {
                            CategoryInfo { category: Category::Nc, scope: None }
                        }
                        AccessKind::Block(cb) => {
                            let (category, scope) = classify(ws, an, AgePoint::Sink, e, k, cb);
                            CategoryInfo { category, scope }
                        }
                        AccessKind::Enum { blocks, .. } => fold_enum(ws, an, e, k, blocks),
                    },
                };
                map.insert((e, k), info);
            }
        }
    }
    CategoryMap { map }
}
