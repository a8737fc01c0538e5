//! Cache index model and access descriptors.
//!
//! `SetCollection` maps addresses to `CacheBlock`s and numbers the distinct
//! blocks observed per set; block ids index the ACS age vectors. `Access`
//! is the tagged-variant description of one memory reference as produced by
//! the access builder.

pub mod builder;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::cfg::{CfgCollection, InstId};
use crate::hard::{Address, Bank, CacheConfig, MemoryMap};

/// A unique memory block observed by the analysis. Blocks of cached banks
/// get a dense id within their set; blocks of non-cached banks keep id −1.
#[derive(Debug)]
pub struct CacheBlock {
    tag: u64,
    set: usize,
    id: i32,
    bank: Rc<Bank>,
}

impl CacheBlock {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn set(&self) -> usize {
        self.set
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn bank(&self) -> &Rc<Bank> {
        &self.bank
    }

    pub fn is_cached(&self) -> bool {
        self.id >= 0
    }

    /// Dense index into the set's age vectors.
    pub fn index(&self) -> usize {
        assert!(self.id >= 0, "age query on a non-cached block");
        self.id as usize
    }
}

impl fmt::Display for CacheBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CB{} (set {}, tag {:#x}, {})", self.id, self.set, self.tag, self.bank.name)
    }
}

/// Blocks of one cache set: tag lookup plus the dense vector of cached
/// blocks.
#[derive(Debug, Default)]
struct BlockCollection {
    map: HashMap<u64, Rc<CacheBlock>>,
    cached: Vec<Rc<CacheBlock>>,
}

impl BlockCollection {
    fn add(&mut self, tag: u64, set: usize, bank: &Rc<Bank>) -> Rc<CacheBlock> {
        let id = if bank.cached { self.cached.len() as i32 } else { -1 };
        let b = Rc::new(CacheBlock { tag, set, id, bank: Rc::clone(bank) });
        if bank.cached {
            self.cached.push(Rc::clone(&b));
        }
        self.map.insert(tag, Rc::clone(&b));
        b
    }
}

/// Per-set block registry shared read-only once the access builder is done.
#[derive(Debug)]
pub struct SetCollection {
    cache: CacheConfig,
    mem: Rc<MemoryMap>,
    sets: Vec<BlockCollection>,
}

impl SetCollection {
    pub fn new(cache: CacheConfig, mem: Rc<MemoryMap>) -> Self {
        let sets = (0..cache.set_count).map(|_| BlockCollection::default()).collect();
        Self { cache, mem, sets }
    }

    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    pub fn memory(&self) -> &Rc<MemoryMap> {
        &self.mem
    }

    /// Block registered for the address, if any.
    pub fn at(&self, a: Address) -> Option<Rc<CacheBlock>> {
        let s = self.cache.set(a);
        self.sets[s].map.get(&self.cache.tag(a)).cloned()
    }

    /// Register the block containing the address; `None` when no memory
    /// bank backs it.
    pub fn add(&mut self, a: Address) -> Option<Rc<CacheBlock>> {
        if let Some(b) = self.at(a) {
            return Some(b);
        }
        let bank = self.mem.get(a)?.clone();
        let s = self.cache.set(a);
        Some(self.sets[s].add(self.cache.tag(a), s, &bank))
    }

    pub fn set_count(&self) -> usize {
        self.cache.set_count
    }

    /// Count of cached blocks observed in the set.
    pub fn block_count(&self, set: usize) -> usize {
        self.sets[set].cached.len()
    }

    /// Cached block of the set by dense id.
    pub fn block(&self, set: usize, id: usize) -> &Rc<CacheBlock> {
        &self.sets[set].cached[id]
    }

    /// Start address of a registered block.
    pub fn address(&self, b: &CacheBlock) -> Address {
        self.cache.address_of(b.set, b.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoAccess,
    Load,
    Store,
    Purge,
    DirectLoad,
    DirectStore,
}

impl Action {
    /// The non-cached counterpart of a cache action.
    pub fn as_direct(self) -> Action {
        match self {
            Action::Load => Action::DirectLoad,
            Action::Store => Action::DirectStore,
            a => a,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::NoAccess => "none",
            Action::Load => "load",
            Action::Store => "store",
            Action::Purge => "purge",
            Action::DirectLoad => "direct-load",
            Action::DirectStore => "direct-store",
        };
        f.write_str(s)
    }
}

/// Target of an access. RANGE and ENUM carry the first and last touched set
/// index; `first > last` means the range wraps past the last set.
#[derive(Debug, Clone)]
pub enum AccessKind {
    Any,
    Block(Rc<CacheBlock>),
    Range { first: usize, last: usize },
    Enum { first: usize, last: usize, blocks: Vec<Rc<CacheBlock>> },
}

/// One memory reference of an instruction.
#[derive(Debug, Clone)]
pub struct Access {
    pub inst: InstId,
    pub action: Action,
    pub kind: AccessKind,
    /// Access width in bytes when known.
    pub width: Option<u32>,
    /// Sub-index within a multi-access instruction.
    pub index: usize,
}

impl Access {
    pub fn any(inst: InstId, action: Action, width: Option<u32>, index: usize) -> Self {
        Self { inst, action, kind: AccessKind::Any, width, index }
    }

    pub fn block(inst: InstId, action: Action, block: Rc<CacheBlock>, width: Option<u32>, index: usize) -> Self {
        Self { inst, action, kind: AccessKind::Block(block), width, index }
    }

    pub fn range(inst: InstId, action: Action, first: usize, last: usize, width: Option<u32>, index: usize) -> Self {
        Self { inst, action, kind: AccessKind::Range { first, last }, width, index }
    }

    /// ENUM access over consecutive cache lines. `blocks` must be ordered by
    /// line, wrapping modulo the set count.
    pub fn enumerate(inst: InstId, action: Action, blocks: Vec<Rc<CacheBlock>>, width: Option<u32>, index: usize) -> Self {
        assert!(!blocks.is_empty(), "empty ENUM access");
        let first = blocks[0].set();
        let last = blocks[blocks.len() - 1].set();
        Self { inst, action, kind: AccessKind::Enum { first, last, blocks }, width, index }
    }

    /// Does this access touch cache set `set`?
    pub fn touches_set(&self, set: usize) -> bool {
        match &self.kind {
            AccessKind::Any => true,
            AccessKind::Block(b) => b.set() == set,
            AccessKind::Range { first, last } | AccessKind::Enum { first, last, .. } => {
                if first <= last {
                    *first <= set && set <= *last
                } else {
                    *first <= set || set <= *last
                }
            }
        }
    }

    /// May this access hit the given cache block?
    pub fn touches_block(&self, block: &Rc<CacheBlock>) -> bool {
        match &self.kind {
            AccessKind::Any => true,
            AccessKind::Block(b) => Rc::ptr_eq(b, block),
            AccessKind::Enum { blocks, .. } => blocks.iter().any(|b| Rc::ptr_eq(b, block)),
            AccessKind::Range { .. } => self.touches_set(block.set()),
        }
    }

    /// For an ENUM access, the block that falls in the given set.
    pub fn block_in(&self, set: usize) -> Option<&Rc<CacheBlock>> {
        match &self.kind {
            AccessKind::Enum { first, last, blocks } => {
                if !self.touches_set(set) {
                    return None;
                }
                if first <= last || set >= *first {
                    Some(&blocks[set - first])
                } else {
                    Some(&blocks[blocks.len() - last + set - 1])
                }
            }
            _ => panic!("block_in on a non-ENUM access"),
        }
    }

    /// Blocks of an ENUM access.
    pub fn blocks(&self) -> &[Rc<CacheBlock>] {
        match &self.kind {
            AccessKind::Enum { blocks, .. } => blocks,
            _ => panic!("blocks() on a non-ENUM access"),
        }
    }

    pub fn describe(&self, cfgs: &CfgCollection) -> String {
        let addr = cfgs.insts[self.inst].address;
        let target = match &self.kind {
            AccessKind::Any => "ANY".to_string(),
            AccessKind::Block(b) => b.to_string(),
            AccessKind::Range { first, last } => format!("[{}, {}] (multiple cache-blocks)", first, last),
            AccessKind::Enum { blocks, .. } => {
                let mut s = String::from("{");
                for b in blocks {
                    s.push_str(&format!(" {}", b));
                }
                s.push_str(" }");
                s
            }
        };
        format!("{:#x}: {} @ {}", addr, self.action, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hard::{ReplacementPolicy, WritePolicy};

    fn cache() -> CacheConfig {
        CacheConfig {
            set_count: 8,
            way_count: 2,
            block_size: 16,
            policy: ReplacementPolicy::Lru,
            write_policy: WritePolicy::WriteThrough,
            write_allocate: true,
        }
    }

    fn ram() -> Rc<MemoryMap> {
        Rc::new(MemoryMap::new(
            vec![Rc::new(Bank {
                name: "ram".into(),
                base: 0,
                last: 0xffff,
                read_latency: 1,
                write_latency: 1,
                cached: true,
            })],
            Some((10, 10)),
        ))
    }

    fn coll() -> SetCollection {
        SetCollection::new(cache(), ram())
    }

    #[test]
    fn blocks_get_dense_ids_per_set() {
        let mut c = coll();
        let b0 = c.add(0x100).unwrap();
        let b1 = c.add(0x100 + 8 * 16).unwrap(); // same set, next tag
        let b2 = c.add(0x110).unwrap(); // next set
        assert_eq!(b0.set(), b1.set());
        assert_eq!(b0.id(), 0);
        assert_eq!(b1.id(), 1);
        assert_eq!(b2.id(), 0);
        assert_eq!(c.block_count(b0.set()), 2);
        assert!(Rc::ptr_eq(c.block(b0.set(), 1), &b1));
        assert_eq!(c.address(&b0), 0x100);
    }

    #[test]
    fn add_is_idempotent_and_checks_banks() {
        let mut c = coll();
        let b = c.add(0x204).unwrap();
        let again = c.add(0x208).unwrap(); // same line
        assert!(Rc::ptr_eq(&b, &again));
        assert!(c.add(0xdead_0000).is_none());
        assert!(c.at(0xdead_0000).is_none());
    }

    fn inst() -> InstId {
        let mut cfgs = CfgCollection::new();
        cfgs.inst_at(0x8000, 0)
    }

    #[test]
    fn range_wraps_modulo_set_count() {
        let a = Access::range(inst(), Action::Load, 6, 1, None, 0);
        assert!(a.touches_set(6));
        assert!(a.touches_set(7));
        assert!(a.touches_set(0));
        assert!(a.touches_set(1));
        assert!(!a.touches_set(3));

        let b = Access::range(inst(), Action::Load, 2, 4, None, 0);
        assert!(b.touches_set(3));
        assert!(!b.touches_set(5));
    }

    #[test]
    fn enum_block_lookup_with_wrap() {
        let mut c = coll();
        // lines at sets 6, 7, 0, 1
        let blocks: Vec<_> = [0x60u64, 0x70, 0x80, 0x90]
            .iter()
            .map(|a| c.add(*a).unwrap())
            .collect();
        assert_eq!(blocks[0].set(), 6);
        assert_eq!(blocks[3].set(), 1);
        let a = Access::enumerate(inst(), Action::Load, blocks.clone(), None, 0);
        assert!(Rc::ptr_eq(a.block_in(6).unwrap(), &blocks[0]));
        assert!(Rc::ptr_eq(a.block_in(7).unwrap(), &blocks[1]));
        assert!(Rc::ptr_eq(a.block_in(0).unwrap(), &blocks[2]));
        assert!(Rc::ptr_eq(a.block_in(1).unwrap(), &blocks[3]));
        assert!(a.block_in(4).is_none());
        assert!(a.touches_block(&blocks[2]));
    }

    #[test]
    fn block_access_identity() {
        let mut c = coll();
        let b = c.add(0x100).unwrap();
        let other = c.add(0x110).unwrap();
        let a = Access::block(inst(), Action::Store, Rc::clone(&b), Some(4), 0);
        assert!(a.touches_set(b.set()));
        assert!(!a.touches_set(other.set()));
        assert!(a.touches_block(&b));
        assert!(!a.touches_block(&other));
    }
}
