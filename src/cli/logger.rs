//! Terminal reporting for the analyzer driver.
//!
//! Three verbosity tiers: quiet keeps only errors, normal adds analysis
//! progress and degradation warnings, verbose adds the cache recap and
//! collection statistics. Colors mark severity, never data.

use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Errors only.
    Quiet,
    /// Progress, warnings and results.
    Normal,
    /// Everything, including per-run statistics.
    Verbose,
}

impl LogLevel {
    pub fn allows(self, target: LogLevel) -> bool {
        self >= target
    }
}

pub struct Logger {
    level: LogLevel,
}

impl Logger {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let level = if quiet {
            LogLevel::Quiet
        } else if verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Normal
        };
        Self { level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// One analysis pass is starting (MUST, MAY, PERS, MultiPERS).
    pub fn analysis_start(&self, name: &str) {
        if !self.level.allows(LogLevel::Normal) {
            return;
        }
        println!("{} {} {}", "Running".blue().bold(), name.bright_white(), "analysis".bright_white());
    }

    /// A sound but precision-losing fallback was taken (range degraded to
    /// an unknown address, set filtered out, ...).
    pub fn degraded(&self, message: &str) {
        if !self.level.allows(LogLevel::Normal) {
            return;
        }
        println!("{} {}", "Warning:".yellow().bold(), message.bright_yellow());
    }

    /// Fatal diagnostics always reach stderr, whatever the level.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "ERROR:".red().bold(), message.bright_red());
    }

    /// Result file announcement.
    pub fn writing(&self, path: &std::path::Path) {
        if !self.level.allows(LogLevel::Normal) {
            return;
        }
        println!(
            "{} {}",
            "Writing".blue().bold(),
            path.display().to_string().bright_blue().underline()
        );
    }

    /// Cache shape recap shown before the analyses start.
    pub fn cache_summary(&self, sets: usize, ways: usize, line: usize, tracked_blocks: usize) {
        if !self.level.allows(LogLevel::Verbose) {
            return;
        }
        println!(
            "  {}: {} sets x {} ways, {}-byte lines, {} tracked blocks",
            "cache".bright_white(),
            sets,
            ways,
            line,
            tracked_blocks
        );
    }

    /// Arena statistics after cleanup.
    pub fn collected(&self, states: usize) {
        if !self.level.allows(LogLevel::Verbose) {
            return;
        }
        println!("  {}: {} abstract states reclaimed", "cleanup".bright_white(), states);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Verbose.allows(LogLevel::Quiet));
        assert!(LogLevel::Verbose.allows(LogLevel::Normal));
        assert!(LogLevel::Normal.allows(LogLevel::Quiet));
        assert!(!LogLevel::Normal.allows(LogLevel::Verbose));
        assert!(!LogLevel::Quiet.allows(LogLevel::Normal));
    }

    #[test]
    fn flags_pick_the_level() {
        assert_eq!(Logger::new(false, false).level(), LogLevel::Normal);
        assert_eq!(Logger::new(true, false).level(), LogLevel::Verbose);
        assert_eq!(Logger::new(false, true).level(), LogLevel::Quiet);
        // quiet wins over verbose
        assert_eq!(Logger::new(true, true).level(), LogLevel::Quiet);
    }
}
