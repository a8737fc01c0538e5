pub mod access;
pub mod acs;
pub mod analysis;
pub mod category;
pub mod cfg;
pub mod cli;
pub mod domain;
pub mod errors;
pub mod event;
pub mod frontend;
pub mod hard;
pub mod ilp;
pub mod solver;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export the analysis surface
pub use analysis::{
    AcsAnalysis, AcsAnalysisKind, AgeInfo, Analysis, AnalysisConfig, MultiAgeInfo,
    MultiPersAnalysis,
};
pub use category::{build_categories, AgePoint, Analyses, Category, CategoryInfo, CategoryMap};
pub use errors::AnalyzerError;
pub use event::{Event, EventBuilder, EventMaps, Occurrence};
pub use frontend::{format_errors, load_str};
pub use workspace::Workspace;
