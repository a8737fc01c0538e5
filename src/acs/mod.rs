//! Abstract cache states.
//!
//! An `Acs` is the age vector of one cache set: one entry per distinct
//! block ever observed in the set, each in `[0..A] ∪ {⊥}` where `BOT_AGE`
//! encodes ⊥ and age `A` means possibly or definitely evicted, depending
//! on the analysis reading it.

pub mod arena;

use std::io;

use crate::access::SetCollection;

pub type Age = u8;

/// The ⊥ age: not yet seen in the current scope (persistence analyses).
pub const BOT_AGE: Age = u8::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acs {
    pub age: Box<[Age]>,
}

impl Acs {
    pub fn new(n: usize, init: Age) -> Self {
        Self { age: vec![init; n].into_boxed_slice() }
    }

    pub fn len(&self) -> usize {
        self.age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.age.is_empty()
    }

    /// Sum of the raw age values (⊥ contributes its encoding).
    pub fn sum(&self) -> u32 {
        self.age.iter().map(|&a| a as u32).sum()
    }

    /// `{ addr: age, ... }` with `_` for ⊥.
    pub fn print(&self, coll: &SetCollection, set: usize) -> String {
        let mut out = String::from("{ ");
        for i in 0..coll.block_count(set) {
            if i != 0 {
                out.push_str(", ");
            }
            let addr = coll.address(coll.block(set, i));
            if self.age[i] == BOT_AGE {
                out.push_str(&format!("{:#x}: _", addr));
            } else {
                out.push_str(&format!("{:#x}: {}", addr, self.age[i]));
            }
        }
        out.push_str(" }");
        out
    }

    /// Raw persistence format: the N age bytes.
    pub fn save<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.age)
    }

    pub fn load<R: io::Read + ?Sized>(n: usize, input: &mut R) -> io::Result<Self> {
        let mut age = vec![0u8; n];
        input.read_exact(&mut age)?;
        Ok(Self { age: age.into_boxed_slice() })
    }
}
