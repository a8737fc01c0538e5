//! Shared fixtures for unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::access::{Access, Action, CacheBlock, SetCollection};
use crate::acs::arena::StateArena;
use crate::cfg::{CfgCollection, EdgeKind, InstId};
use crate::domain::ArenaRef;
use crate::hard::{Address, Bank, CacheConfig, MemoryMap, ReplacementPolicy, WritePolicy};
use crate::workspace::Workspace;

pub struct Fixture {
    pub ws: Rc<Workspace>,
    pub arena: ArenaRef,
    pub set: usize,
    pub blocks: Vec<Rc<CacheBlock>>,
    pub inst: InstId,
}

pub fn cache() -> CacheConfig {
    CacheConfig {
        set_count: 4,
        way_count: 2,
        block_size: 16,
        policy: ReplacementPolicy::Lru,
        write_policy: WritePolicy::WriteThrough,
        write_allocate: true,
    }
}

pub fn memory() -> Rc<MemoryMap> {
    Rc::new(MemoryMap::new(
        vec![
            Rc::new(Bank {
                name: "ram".into(),
                base: 0,
                last: 0xffff,
                read_latency: 1,
                write_latency: 2,
                cached: true,
            }),
            Rc::new(Bank {
                name: "io".into(),
                base: 0xff00_0000,
                last: 0xff00_ffff,
                read_latency: 5,
                write_latency: 6,
                cached: false,
            }),
        ],
        Some((10, 12)),
    ))
}

/// Workspace with a trivial one-block CFG and the given addresses
/// registered as cache blocks, all expected in the same set.
pub fn same_set_blocks(addrs: &[Address]) -> Fixture {
    let mut coll = SetCollection::new(cache(), memory());
    let blocks: Vec<_> = addrs
        .iter()
        .map(|&a| coll.add(a).expect("address outside test banks"))
        .collect();
    let set = blocks[0].set();
    assert!(blocks.iter().all(|b| b.set() == set));

    let mut cfgs = CfgCollection::new();
    let main = cfgs.add_cfg("main");
    let b1 = cfgs.add_block(main, "b1");
    let entry = cfgs.entry_of(main);
    let exit = cfgs.exit_of(main);
    cfgs.add_edge(entry, b1, EdgeKind::Flow);
    cfgs.add_edge(b1, exit, EdgeKind::Flow);
    let inst = cfgs.inst_at(0x8000, 0);

    Fixture {
        ws: Workspace::new(cfgs, coll),
        arena: Rc::new(RefCell::new(StateArena::new())),
        set,
        blocks,
        inst,
    }
}

pub fn load(fx: &Fixture, i: usize) -> Access {
    Access::block(fx.inst, Action::Load, Rc::clone(&fx.blocks[i]), None, 0)
}

pub fn store(fx: &Fixture, i: usize) -> Access {
    Access::block(fx.inst, Action::Store, Rc::clone(&fx.blocks[i]), None, 0)
}

pub fn purge(fx: &Fixture, i: usize) -> Access {
    Access::block(fx.inst, Action::Purge, Rc::clone(&fx.blocks[i]), None, 0)
}

pub fn load_any(fx: &Fixture) -> Access {
    Access::any(fx.inst, Action::Load, None, 0)
}
