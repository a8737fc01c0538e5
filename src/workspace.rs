//! The analysis input bundle.
//!
//! Once the access builder has run, the workspace is shared read-only
//! between the per-set solvers, the classifier and the event builder.

use std::rc::Rc;

use crate::access::SetCollection;
use crate::cfg::CfgCollection;
use crate::hard::{CacheConfig, MemoryMap};

#[derive(Debug)]
pub struct Workspace {
    pub cfgs: CfgCollection,
    pub coll: SetCollection,
}

impl Workspace {
    pub fn new(cfgs: CfgCollection, coll: SetCollection) -> Rc<Self> {
        Rc::new(Self { cfgs, coll })
    }

    pub fn cache(&self) -> &CacheConfig {
        self.coll.cache()
    }

    pub fn memory(&self) -> &Rc<MemoryMap> {
        self.coll.memory()
    }
}
