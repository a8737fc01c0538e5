//! Access builder: raw address information to `Access` records.
//!
//! Stands where the value-range provider hands over its results. Constant
//! addresses become BLOCK accesses, small ranges become ENUM accesses over
//! their cache lines, and everything the cache cannot track degrades to
//! ANY: ranges spanning several banks and ranges covering at least as many
//! lines as the cache has sets (both reported as warnings). Stores without
//! write-allocation and accesses to non-cached banks are rewritten to
//! their direct actions.

use std::collections::HashMap;
use std::rc::Rc;

use crate::access::{Access, Action, SetCollection};
use crate::cfg::{BlockId, CfgCollection, InstId};
use crate::errors::AnalyzerError;
use crate::hard::{Address, CacheConfig, MemoryMap};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpec {
    /// Completely unknown address.
    Any,
    Const(Address),
    /// Inclusive address range.
    Range(Address, Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAction {
    Load,
    Store,
    Purge,
}

/// One access statement as parsed, before cache-block resolution.
#[derive(Debug, Clone)]
pub struct RawAccess {
    pub inst: InstId,
    pub action: RawAction,
    pub spec: AddressSpec,
    pub width: Option<u32>,
}

pub struct AccessBuilder {
    coll: SetCollection,
    warnings: Vec<String>,
}

impl AccessBuilder {
    pub fn new(cache: CacheConfig, mem: Rc<MemoryMap>) -> Self {
        Self { coll: SetCollection::new(cache, mem), warnings: Vec::new() }
    }

    /// Resolve every raw access, attach the lists to their blocks and seal
    /// the workspace.
    pub fn build(
        mut self,
        mut cfgs: CfgCollection,
        stmts: Vec<(BlockId, Vec<RawAccess>)>,
    ) -> Result<(Rc<Workspace>, Vec<String>), AnalyzerError> {
        for (v, raws) in stmts {
            let mut indices: HashMap<InstId, usize> = HashMap::new();
            let mut accesses = Vec::with_capacity(raws.len());
            for raw in raws {
                let index = indices.entry(raw.inst).or_insert(0);
                let a = self.make_access(&cfgs, &raw, *index)?;
                *index += 1;
                accesses.push(a);
            }
            cfgs.set_accesses(v, accesses);
        }
        Ok((Workspace::new(cfgs, self.coll), self.warnings))
    }

    fn make_access(
        &mut self,
        cfgs: &CfgCollection,
        raw: &RawAccess,
        index: usize,
    ) -> Result<Access, AnalyzerError> {
        let inst_addr = cfgs.insts[raw.inst].address;
        match (raw.action, raw.spec) {
            (RawAction::Purge, AddressSpec::Const(addr)) => {
                let b = self
                    .coll
                    .add(addr)
                    .ok_or(AnalyzerError::AddressOutOfBanks { addr, inst: inst_addr })?;
                // purging a non-cached block has no cache effect
                let action = if b.is_cached() { Action::Purge } else { Action::NoAccess };
                Ok(Access::block(raw.inst, action, b, raw.width, index))
            }
            (RawAction::Purge, _) => Ok(Access::any(raw.inst, Action::Purge, raw.width, index)),
            (action, AddressSpec::Any) => {
                Ok(Access::any(raw.inst, cache_action(action), raw.width, index))
            }
            (action, AddressSpec::Const(addr)) => {
                let b = self
                    .coll
                    .add(addr)
                    .ok_or(AnalyzerError::AddressOutOfBanks { addr, inst: inst_addr })?;
                let mut action = cache_action(action);
                if action == Action::Store && !self.coll.cache().write_allocate {
                    action = action.as_direct();
                } else if !b.is_cached() {
                    action = action.as_direct();
                }
                Ok(Access::block(raw.inst, action, b, raw.width, index))
            }
            (action, AddressSpec::Range(lo, hi)) => self.make_range(cfgs, raw, action, lo, hi, index),
        }
    }

    fn make_range(
        &mut self,
        cfgs: &CfgCollection,
        raw: &RawAccess,
        action: RawAction,
        lo: Address,
        hi: Address,
        index: usize,
    ) -> Result<Access, AnalyzerError> {
        let inst_addr = cfgs.insts[raw.inst].address;
        let cache = self.coll.cache().clone();

        if cache.count_blocks(lo, hi) >= cache.set_count {
            self.warnings.push(format!(
                "access at {:#x} covers {} cache lines, considered as T",
                inst_addr,
                cache.count_blocks(lo, hi)
            ));
            return Ok(Access::any(raw.inst, cache_action(action), raw.width, index));
        }

        let lb = self
            .coll
            .add(lo)
            .ok_or(AnalyzerError::AddressOutOfBanks { addr: lo, inst: inst_addr })?;
        let hb = self
            .coll
            .add(hi)
            .ok_or(AnalyzerError::AddressOutOfBanks { addr: hi, inst: inst_addr })?;

        if !Rc::ptr_eq(lb.bank(), hb.bank()) {
            self.warnings.push(format!(
                "access at {:#x} spanning over several banks considered as T",
                inst_addr
            ));
            return Ok(Access::any(raw.inst, cache_action(action), raw.width, index));
        }

        let mut action = cache_action(action);
        if !lb.bank().cached {
            action = action.as_direct();
        }
        if action == Action::Store && !cache.write_allocate {
            action = action.as_direct();
        }

        if Rc::ptr_eq(&lb, &hb) {
            return Ok(Access::block(raw.inst, action, lb, raw.width, index));
        }

        let mut blocks = Vec::new();
        let mut a = cache.round(lo);
        loop {
            let b = self
                .coll
                .add(a)
                .ok_or(AnalyzerError::AddressOutOfBanks { addr: a, inst: inst_addr })?;
            blocks.push(b);
            if a == cache.round(hi) {
                break;
            }
            a += cache.block_size as u64;
        }
        Ok(Access::enumerate(raw.inst, action, blocks, raw.width, index))
    }
}

fn cache_action(a: RawAction) -> Action {
    match a {
        RawAction::Load => Action::Load,
        RawAction::Store => Action::Store,
        RawAction::Purge => Action::Purge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessKind;
    use crate::cfg::EdgeKind;
    use crate::testkit;

    fn scaffold() -> (CfgCollection, BlockId, InstId) {
        let mut cfgs = CfgCollection::new();
        let main = cfgs.add_cfg("main");
        let v = cfgs.add_block(main, "v");
        let entry = cfgs.entry_of(main);
        let exit = cfgs.exit_of(main);
        cfgs.add_edge(entry, v, EdgeKind::Flow);
        cfgs.add_edge(v, exit, EdgeKind::Flow);
        let i = cfgs.inst_at(0x8000, 0);
        (cfgs, v, i)
    }

    fn build_one(
        make_raw: impl FnOnce(InstId) -> RawAccess,
    ) -> Result<(Rc<Workspace>, Vec<String>), AnalyzerError> {
        let (cfgs, v, i) = scaffold();
        let raw = make_raw(i);
        let builder = AccessBuilder::new(testkit::cache(), testkit::memory());
        builder.build(cfgs, vec![(v, vec![raw])])
    }

    fn only_access(ws: &Workspace) -> Access {
        for (_, b) in ws.cfgs.blocks.iter() {
            if !b.accesses.is_empty() {
                return b.accesses[0].clone();
            }
        }
        panic!("no access built");
    }

    #[test]
    fn constant_address_becomes_a_block_access() {
        let raw = |i| RawAccess { inst: i, action: RawAction::Load, spec: AddressSpec::Const(0x104), width: Some(4) };
        let (ws, warnings) = build_one(raw).unwrap();
        assert!(warnings.is_empty());
        let a = only_access(&ws);
        assert_eq!(a.action, Action::Load);
        match a.kind {
            AccessKind::Block(ref b) => assert_eq!(ws.coll.address(b), 0x100),
            ref k => panic!("unexpected kind {:?}", k),
        }
    }

    #[test]
    fn uncached_bank_rewrites_to_direct() {
        let raw = |i| RawAccess {
            inst: i,
            action: RawAction::Load,
            spec: AddressSpec::Const(0xff00_0010),
            width: None,
        };
        let (ws, _) = build_one(raw).unwrap();
        let a = only_access(&ws);
        assert_eq!(a.action, Action::DirectLoad);
    }

    #[test]
    fn store_without_allocation_is_direct() {
        let (cfgs, v, i) = scaffold();
        let mut cache = testkit::cache();
        cache.write_allocate = false;
        let builder = AccessBuilder::new(cache, testkit::memory());
        let raw = RawAccess { inst: i, action: RawAction::Store, spec: AddressSpec::Const(0x104), width: None };
        let (ws, _) = builder.build(cfgs, vec![(v, vec![raw])]).unwrap();
        let a = only_access(&ws);
        assert_eq!(a.action, Action::DirectStore);
    }

    #[test]
    fn small_range_becomes_an_enum_over_lines() {
        let raw = |i| RawAccess {
            inst: i,
            action: RawAction::Load,
            spec: AddressSpec::Range(0x104, 0x12c),
            width: None,
        };
        let (ws, warnings) = build_one(raw).unwrap();
        assert!(warnings.is_empty());
        let a = only_access(&ws);
        match a.kind {
            AccessKind::Enum { ref blocks, .. } => {
                assert_eq!(blocks.len(), 3);
                assert_eq!(ws.coll.address(&blocks[0]), 0x100);
                assert_eq!(ws.coll.address(&blocks[2]), 0x120);
            }
            ref k => panic!("unexpected kind {:?}", k),
        }
    }

    #[test]
    fn oversized_range_degrades_to_any_with_warning() {
        // 5 lines over a 4-set cache
        let raw = |i| RawAccess {
            inst: i,
            action: RawAction::Load,
            spec: AddressSpec::Range(0x100, 0x140),
            width: None,
        };
        let (ws, warnings) = build_one(raw).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("cache lines"));
        assert!(matches!(only_access(&ws).kind, AccessKind::Any));
    }

    #[test]
    fn cross_bank_range_degrades_to_any_with_warning() {
        use crate::hard::{Bank, MemoryMap};

        let mem = Rc::new(MemoryMap::new(
            vec![
                Rc::new(Bank {
                    name: "lo".into(),
                    base: 0,
                    last: 0xfff,
                    read_latency: 1,
                    write_latency: 1,
                    cached: true,
                }),
                Rc::new(Bank {
                    name: "hi".into(),
                    base: 0x1000,
                    last: 0x1fff,
                    read_latency: 1,
                    write_latency: 1,
                    cached: true,
                }),
            ],
            Some((10, 12)),
        ));
        let (cfgs, v, i) = scaffold();
        let builder = AccessBuilder::new(testkit::cache(), mem);
        // two lines only, but one in each bank
        let raw = RawAccess { inst: i, action: RawAction::Load, spec: AddressSpec::Range(0xff8, 0x1004), width: None };
        let (ws, warnings) = builder.build(cfgs, vec![(v, vec![raw])]).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("several banks"));
        assert!(matches!(only_access(&ws).kind, AccessKind::Any));
    }

    #[test]
    fn unmapped_address_is_fatal() {
        let raw = |i| RawAccess {
            inst: i,
            action: RawAction::Load,
            spec: AddressSpec::Const(0xdead_0000),
            width: None,
        };
        let err = build_one(raw).unwrap_err();
        assert!(matches!(err, AnalyzerError::AddressOutOfBanks { addr: 0xdead_0000, .. }));
    }
}
