use crate::hard::{Address, ReplacementPolicy};

/// Fatal analyzer-level failures. Configuration and address errors abort
/// before any fixed-point work starts.
#[derive(Debug, Clone)]
pub enum AnalyzerError {
    /// No data cache in the hardware description.
    NoDataCache,
    /// The cache replacement policy is not LRU; the ACS lattices are only
    /// sound for LRU.
    UnsupportedPolicy(ReplacementPolicy),
    /// No memory map in the hardware description.
    NoMemoryMap,
    /// An accessed address is not backed by any memory bank.
    AddressOutOfBanks { addr: Address, inst: Address },
    /// The fixed point did not converge within the iteration cap.
    FixedPointDiverged { set: usize },
}

impl std::fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDataCache => write!(f, "no data cache configured"),
            Self::UnsupportedPolicy(p) => {
                write!(f, "unsupported replacement policy {:?} (only LRU is supported)", p)
            }
            Self::NoMemoryMap => write!(f, "no memory map configured"),
            Self::AddressOutOfBanks { addr, inst } => write!(
                f,
                "no memory bank for address {:#x} accessed from instruction {:#x}",
                addr, inst
            ),
            Self::FixedPointDiverged { set } => {
                write!(f, "fixed-point iteration cap exceeded for cache set {}", set)
            }
        }
    }
}

impl std::error::Error for AnalyzerError {}
