//! Parser for the textual workspace format.
//!
//! The format describes everything the engine consumes: the cache
//! geometry, the memory banks, and per-CFG blocks, loops, calls, edges
//! (with loop-entry/loop-exit markers) and access statements. It stands in
//! for the hardware-description and address-analysis collaborators so the
//! engine can be driven from a single file.
//!
//! ```text
//! cache { sets: 4; ways: 2; line: 4; policy: lru; write: through; }
//! memory {
//!     bank ram [0x0, 0xffff] read 1 write 2 cached;
//!     worst read 10 write 12;
//! }
//! cfg main {
//!     loop l1 header h;
//!     block b0 { }
//!     block h in l1 { load 0x100; }
//!     edge entry -> b0;
//!     edge b0 -> h enter;
//!     edge h -> h;
//!     edge h -> exit exit;
//! }
//! ```

pub mod errors;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashMap;
use std::rc::Rc;

pub use errors::{format_errors, LoadError, Results, Span, SpannedError};

use crate::access::builder::{AddressSpec, RawAccess, RawAction};
use crate::cfg::{BlockId, CfgCollection, CfgId, EdgeKind, LoopId};
use crate::hard::{Address, Bank, CacheConfig, MemoryMap, ReplacementPolicy, WritePolicy};

#[derive(Parser)]
#[grammar = "frontend/parse/grammar.pest"]
pub struct WorkspaceParser;

/// Parse output: the hardware description, the wired CFG collection and
/// the raw access statements awaiting the access builder.
#[derive(Debug)]
pub struct ParsedWorkspace {
    pub cache: CacheConfig,
    pub memory: Rc<MemoryMap>,
    pub cfgs: CfgCollection,
    pub stmts: Vec<(BlockId, Vec<RawAccess>)>,
}

fn error_at(pair: &Pair<Rule>, error: LoadError) -> SpannedError {
    SpannedError { error, span: Some(Span::from_pest(pair.as_span())) }
}

fn parse_number(text: &str) -> u64 {
    if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        text.parse().unwrap_or(0)
    }
}

pub fn parse_workspace(source: &str) -> Results<ParsedWorkspace> {
    let mut pairs = WorkspaceParser::parse(Rule::workspace, source)
        .map_err(|e| vec![SpannedError { error: LoadError::ParseError(e.to_string()), span: None }])?;
    let root = pairs
        .next()
        .ok_or_else(|| vec![SpannedError { error: LoadError::ParseError("empty input".into()), span: None }])?;

    let mut cache = None;
    let mut memory = None;
    let mut cfg_pairs = Vec::new();
    for item in root.into_inner() {
        match item.as_rule() {
            Rule::cache_decl => cache = Some(parse_cache(item)?),
            Rule::memory_decl => memory = Some(parse_memory(item)?),
            Rule::cfg_decl => cfg_pairs.push(item),
            _ => {}
        }
    }
    let cache = cache
        .ok_or_else(|| vec![SpannedError { error: LoadError::ParseError("missing cache".into()), span: None }])?;
    let memory = memory
        .ok_or_else(|| vec![SpannedError { error: LoadError::ParseError("missing memory".into()), span: None }])?;

    let mut builder = GraphBuilder::new();
    for p in &cfg_pairs {
        builder.declare_cfg(p)?;
    }
    for p in cfg_pairs {
        builder.build_cfg(p)?;
    }

    Ok(ParsedWorkspace { cache, memory, cfgs: builder.cfgs, stmts: builder.stmts })
}

fn parse_cache(pair: Pair<Rule>) -> Results<CacheConfig> {
    let mut sets = 0u64;
    let mut ways = 0u64;
    let mut line = 0u64;
    let mut policy = ReplacementPolicy::Lru;
    let mut write = WritePolicy::WriteThrough;
    let mut allocate = true;
    let mut errors = Vec::new();

    for field in pair.into_inner() {
        if field.as_rule() != Rule::cache_field {
            continue;
        }
        let span_pair = field.clone();
        let mut inner = field.into_inner();
        let key = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
        let value = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
        match key.as_str() {
            "sets" => sets = parse_number(&value),
            "ways" => ways = parse_number(&value),
            "line" => line = parse_number(&value),
            "policy" => {
                policy = match value.as_str() {
                    "lru" => ReplacementPolicy::Lru,
                    "fifo" => ReplacementPolicy::Fifo,
                    "random" => ReplacementPolicy::Random,
                    "plru" => ReplacementPolicy::Plru,
                    _ => {
                        errors.push(error_at(&span_pair, LoadError::BadValue { field: key.clone(), value }));
                        continue;
                    }
                }
            }
            "write" => {
                write = match value.as_str() {
                    "through" => WritePolicy::WriteThrough,
                    "back" => WritePolicy::WriteBack,
                    _ => {
                        errors.push(error_at(&span_pair, LoadError::BadValue { field: key.clone(), value }));
                        continue;
                    }
                }
            }
            "allocate" => {
                allocate = match value.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        errors.push(error_at(&span_pair, LoadError::BadValue { field: key.clone(), value }));
                        continue;
                    }
                }
            }
            _ => errors.push(error_at(&span_pair, LoadError::BadCacheField(key))),
        }
    }

    for (name, v) in [("sets", sets), ("line", line)] {
        if v == 0 || !v.is_power_of_two() {
            errors.push(SpannedError {
                error: LoadError::NotPowerOfTwo { field: name.to_string(), value: v },
                span: None,
            });
        }
    }
    if ways == 0 {
        errors.push(SpannedError {
            error: LoadError::BadValue { field: "ways".into(), value: ways.to_string() },
            span: None,
        });
    }

    if errors.is_empty() {
        Ok(CacheConfig {
            set_count: sets as usize,
            way_count: ways as usize,
            block_size: line as usize,
            policy,
            write_policy: write,
            write_allocate: allocate,
        })
    } else {
        Err(errors)
    }
}

fn parse_memory(pair: Pair<Rule>) -> Results<Rc<MemoryMap>> {
    let mut banks = Vec::new();
    let mut worst = None;
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::bank_decl => {
                let mut inner = item.into_inner();
                let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                let base = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                let last = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                let read = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                let write = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                let cached = inner.next().map(|p| p.as_str() == "cached").unwrap_or(false);
                banks.push(Rc::new(Bank {
                    name,
                    base,
                    last,
                    read_latency: read,
                    write_latency: write,
                    cached,
                }));
            }
            Rule::worst_decl => {
                let mut inner = item.into_inner();
                let read = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                let write = parse_number(inner.next().map(|p| p.as_str()).unwrap_or("0"));
                worst = Some((read, write));
            }
            _ => {}
        }
    }
    Ok(Rc::new(MemoryMap::new(banks, worst)))
}

struct GraphBuilder {
    cfgs: CfgCollection,
    cfg_map: HashMap<String, CfgId>,
    stmts: Vec<(BlockId, Vec<RawAccess>)>,
    /// Synthesized instruction addresses for statements without `@`.
    next_addr: Address,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            cfgs: CfgCollection::new(),
            cfg_map: HashMap::new(),
            stmts: Vec::new(),
            next_addr: 0x4000_0000,
        }
    }

    fn declare_cfg(&mut self, pair: &Pair<Rule>) -> Results<()> {
        let name_pair = pair
            .clone()
            .into_inner()
            .next()
            .ok_or_else(|| vec![SpannedError { error: LoadError::ParseError("cfg without name".into()), span: None }])?;
        let name = name_pair.as_str().to_string();
        if self.cfg_map.contains_key(&name) {
            return Err(vec![error_at(&name_pair, LoadError::DuplicateCfg(name))]);
        }
        let g = self.cfgs.add_cfg(&name);
        self.cfg_map.insert(name, g);
        Ok(())
    }

    fn build_cfg(&mut self, pair: Pair<Rule>) -> Results<()> {
        let mut inner = pair.into_inner();
        let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
        let g = self.cfg_map[&name];
        let items: Vec<Pair<Rule>> = inner.collect();
        let mut errors = Vec::new();

        let mut block_map: HashMap<String, BlockId> = HashMap::new();
        block_map.insert("entry".into(), self.cfgs.entry_of(g));
        block_map.insert("exit".into(), self.cfgs.exit_of(g));

        // blocks and synthetic call blocks
        for item in &items {
            match item.as_rule() {
                Rule::block_decl => {
                    let name_pair = item.clone().into_inner().next().expect("block without name");
                    let bname = name_pair.as_str().to_string();
                    if block_map.contains_key(&bname) {
                        errors.push(error_at(&name_pair, LoadError::DuplicateBlock(bname)));
                        continue;
                    }
                    let v = self.cfgs.add_block(g, &bname);
                    block_map.insert(bname, v);
                }
                Rule::call_decl => {
                    let mut ci = item.clone().into_inner();
                    let name_pair = ci.next().expect("call without name");
                    let callee_pair = ci.next().expect("call without callee");
                    let bname = name_pair.as_str().to_string();
                    if block_map.contains_key(&bname) {
                        errors.push(error_at(&name_pair, LoadError::DuplicateBlock(bname)));
                        continue;
                    }
                    match self.cfg_map.get(callee_pair.as_str()) {
                        Some(&callee) => {
                            let v = self.cfgs.add_synth(g, &bname, callee);
                            block_map.insert(bname, v);
                        }
                        None => errors.push(error_at(
                            &callee_pair,
                            LoadError::UndeclaredCfg(callee_pair.as_str().to_string()),
                        )),
                    }
                }
                _ => {}
            }
        }

        // loops (headers exist now)
        let mut loop_map: HashMap<String, LoopId> = HashMap::new();
        let mut headers: Vec<BlockId> = Vec::new();
        for item in &items {
            if item.as_rule() != Rule::loop_decl {
                continue;
            }
            let mut li = item.clone().into_inner();
            let lname_pair = li.next().expect("loop without name");
            let header_pair = li.next().expect("loop without header");
            let lname = lname_pair.as_str().to_string();
            if loop_map.contains_key(&lname) {
                errors.push(error_at(&lname_pair, LoadError::DuplicateLoop(lname)));
                continue;
            }
            let header = match block_map.get(header_pair.as_str()) {
                Some(&h) => h,
                None => {
                    errors.push(error_at(
                        &header_pair,
                        LoadError::UndeclaredBlock(header_pair.as_str().to_string()),
                    ));
                    continue;
                }
            };
            let parent = match li.next() {
                Some(pc) => {
                    let pname = pc.into_inner().next().expect("parent without name");
                    match loop_map.get(pname.as_str()) {
                        Some(&p) => Some(p),
                        None => {
                            errors.push(error_at(
                                &pname,
                                LoadError::UndeclaredLoop(pname.as_str().to_string()),
                            ));
                            continue;
                        }
                    }
                }
                None => None,
            };
            let l = self.cfgs.add_loop(g, header, parent);
            loop_map.insert(lname, l);
            headers.push(header);
        }

        // loop membership of non-header blocks
        for item in &items {
            let (name_pair, in_clause) = match item.as_rule() {
                Rule::block_decl => {
                    let mut bi = item.clone().into_inner();
                    let name_pair = bi.next().expect("block without name");
                    let in_clause = bi.find(|p| p.as_rule() == Rule::in_clause);
                    (name_pair, in_clause)
                }
                Rule::call_decl => {
                    let mut ci = item.clone().into_inner();
                    let name_pair = ci.next().expect("call without name");
                    ci.next();
                    let in_clause = ci.find(|p| p.as_rule() == Rule::in_clause);
                    (name_pair, in_clause)
                }
                _ => continue,
            };
            let Some(in_clause) = in_clause else { continue };
            let Some(&v) = block_map.get(name_pair.as_str()) else { continue };
            if headers.contains(&v) {
                continue;
            }
            let lp = in_clause.into_inner().next().expect("in without loop name");
            match loop_map.get(lp.as_str()) {
                Some(&l) => self.cfgs.assign_loop(v, l),
                None => errors.push(error_at(&lp, LoadError::UndeclaredLoop(lp.as_str().to_string()))),
            }
        }

        // access statements
        for item in &items {
            if item.as_rule() != Rule::block_decl {
                continue;
            }
            let mut bi = item.clone().into_inner();
            let name_pair = bi.next().expect("block without name");
            let Some(&v) = block_map.get(name_pair.as_str()) else { continue };
            let mut raws = Vec::new();
            for stmt in bi.filter(|p| p.as_rule() == Rule::stmt) {
                match self.parse_stmt(stmt) {
                    Ok(raw) => raws.push(raw),
                    Err(mut errs) => errors.append(&mut errs),
                }
            }
            if !raws.is_empty() {
                self.stmts.push((v, raws));
            }
        }

        // edges
        for item in &items {
            if item.as_rule() != Rule::edge_decl {
                continue;
            }
            let mut ei = item.clone().into_inner();
            let src_pair = ei.next().expect("edge without source");
            let snk_pair = ei.next().expect("edge without sink");
            let kind = match ei.next().map(|p| p.as_str().to_string()) {
                Some(m) if m == "enter" => EdgeKind::LoopEntry,
                Some(m) if m == "exit" => EdgeKind::LoopExit,
                _ => EdgeKind::Flow,
            };
            let src = block_map.get(src_pair.as_str()).copied();
            let snk = block_map.get(snk_pair.as_str()).copied();
            match (src, snk) {
                (Some(src), Some(snk)) => {
                    self.cfgs.add_edge(src, snk, kind);
                }
                (None, _) => {
                    errors.push(error_at(&src_pair, LoadError::UndeclaredBlock(src_pair.as_str().to_string())))
                }
                (_, None) => {
                    errors.push(error_at(&snk_pair, LoadError::UndeclaredBlock(snk_pair.as_str().to_string())))
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn parse_stmt(&mut self, stmt: Pair<Rule>) -> Results<RawAccess> {
        let mut addr = None;
        let mut action = RawAction::Load;
        let mut spec = AddressSpec::Any;
        let mut width = None;
        let mut multi = 0usize;
        let span_pair = stmt.clone();

        for part in stmt.into_inner() {
            match part.as_rule() {
                Rule::at_clause => {
                    let n = part.into_inner().next().expect("@ without address");
                    addr = Some(parse_number(n.as_str()));
                }
                Rule::action_kw => {
                    action = match part.as_str() {
                        "load" => RawAction::Load,
                        "store" => RawAction::Store,
                        _ => RawAction::Purge,
                    };
                }
                Rule::target => {
                    let t = part.into_inner().next().expect("empty target");
                    spec = match t.as_rule() {
                        Rule::any_target => AddressSpec::Any,
                        Rule::const_target => AddressSpec::Const(parse_number(t.as_str())),
                        Rule::range_target => {
                            let mut ri = t.into_inner();
                            let lo = parse_number(ri.next().expect("range without lo").as_str());
                            let hi = parse_number(ri.next().expect("range without hi").as_str());
                            if hi < lo {
                                return Err(vec![error_at(&span_pair, LoadError::EmptyRange { lo, hi })]);
                            }
                            AddressSpec::Range(lo, hi)
                        }
                        _ => AddressSpec::Any,
                    };
                }
                Rule::size_clause => {
                    let n = part.into_inner().next().expect("size without value");
                    width = Some(parse_number(n.as_str()) as u32);
                }
                Rule::multi_clause => {
                    let n = part.into_inner().next().expect("multi without count");
                    multi = parse_number(n.as_str()) as usize;
                }
                _ => {}
            }
        }

        let addr = addr.unwrap_or_else(|| {
            let a = self.next_addr;
            self.next_addr += 4;
            a
        });
        let inst = self.cfgs.inst_at(addr, multi);
        Ok(RawAccess { inst, action, spec, width })
    }
}
