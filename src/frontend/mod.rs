//! Workspace loading: parse the textual description and resolve its access
//! statements into the analysis-ready `Workspace`.

pub mod parse;

use std::rc::Rc;

use crate::access::builder::AccessBuilder;
use crate::workspace::Workspace;

pub use parse::{format_errors, LoadError, Results, Span, SpannedError};

/// Parse and build a workspace from source text. Returns the sealed
/// workspace plus the degradation warnings collected by the access
/// builder.
pub fn load_str(source: &str) -> Results<(Rc<Workspace>, Vec<String>)> {
    let parsed = parse::parse_workspace(source)?;
    let builder = AccessBuilder::new(parsed.cache, parsed.memory);
    builder
        .build(parsed.cfgs, parsed.stmts)
        .map_err(|e| vec![SpannedError { error: LoadError::Analyzer(e), span: None }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessKind;

    #[test]
    fn load_resolves_accesses() {
        let src = r#"
            cache { sets: 4; ways: 2; line: 16; }
            memory {
                bank ram [0x0, 0xffff] read 1 write 2 cached;
                worst read 10 write 12;
            }
            cfg main {
                block b { load 0x100; load [0x200, 0x22c]; }
                edge entry -> b;
                edge b -> exit;
            }
        "#;
        let (ws, warnings) = load_str(src).unwrap();
        assert!(warnings.is_empty());
        let b = ws
            .cfgs
            .blocks
            .iter()
            .find(|(_, b)| b.name == "b")
            .map(|(id, _)| id)
            .unwrap();
        let accesses = &ws.cfgs.blocks[b].accesses;
        assert_eq!(accesses.len(), 2);
        assert!(matches!(accesses[0].kind, AccessKind::Block(_)));
        assert!(matches!(accesses[1].kind, AccessKind::Enum { .. }));
        assert_eq!(ws.coll.block_count(0), 2); // 0x100 and 0x200 share set 0
    }

    #[test]
    fn address_outside_banks_fails_to_load() {
        let src = r#"
            cache { sets: 4; ways: 2; line: 16; }
            memory { bank ram [0x0, 0xffff] read 1 write 2 cached; }
            cfg main {
                block b { load 0xdead0000; }
                edge entry -> b;
                edge b -> exit;
            }
        "#;
        let errs = load_str(src).unwrap_err();
        assert!(matches!(errs[0].error, LoadError::Analyzer(_)));
    }
}
