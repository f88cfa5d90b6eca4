//! basalt-core: a shader-compiler backend.
//!
//! This crate lowers a portable SSA intermediate representation (`sir`)
//! into wave-ISA pseudo-instructions (`isa`) for a GCN/RDNA-class GPU.
//! The central pass is `isel::select_program`, which walks the input
//! program's structured control-flow tree, emits target instructions into
//! basic blocks, and builds the dual logical/linear CFG required by the
//! divergence model. Register allocation, scheduling and binary encoding
//! run after this crate and are not part of it.

pub mod error;
pub mod isa;
pub mod isel;
pub mod sir;

use std::marker::PhantomData;

pub use error::{CompilerError, Result};

// =============================================================================
// Generic ID allocation
// =============================================================================

/// Generic counter for generating unique IDs.
///
/// The ID type must implement `From<u32>` to convert the raw counter value.
/// Allocation order carries no meaning beyond uniqueness.
#[derive(Debug, Clone)]
pub struct IdSource<Id> {
    next_id: u32,
    _phantom: PhantomData<Id>,
}

impl<Id: From<u32>> IdSource<Id> {
    pub fn new() -> Self {
        IdSource {
            next_id: 0,
            _phantom: PhantomData,
        }
    }

    pub fn next(&mut self) -> Id {
        let id = Id::from(self.next_id);
        self.next_id += 1;
        id
    }

    /// Number of IDs handed out so far.
    pub fn count(&self) -> u32 {
        self.next_id
    }
}

impl<Id: From<u32>> Default for IdSource<Id> {
    fn default() -> Self {
        Self::new()
    }
}
