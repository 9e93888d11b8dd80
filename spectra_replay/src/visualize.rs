//! GraphViz emission for a finished replay.
//!
//! Walks the machine arena in creation order and emits one `digraph` per
//! machine that survives the draw filters. The filters keep the drawing
//! legible on real traces: single-instance anonymous object families are
//! noise unless they caused a deopt, and functions that never optimized
//! have nothing to show.

use spectra_core::machine::MachineKind;
use spectra_core::Analyzer;
use std::io::Write;
use std::path::Path;

/// Which machine kinds to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    /// Objects, boilerplates and functions.
    Both,
    /// Suppress function machines.
    ObjectsOnly,
    /// Suppress object machines (boilerplates still draw).
    FunctionsOnly,
}

/// Draw filters.
#[derive(Debug, Clone)]
pub struct DrawOptions {
    /// Only machines whose name contains this signature.
    pub filter: Option<String>,
    /// Kind selection.
    pub mode: DrawMode,
    /// Minimum states+edges for an object machine that caused no deopt.
    pub min_states: usize,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            filter: None,
            mode: DrawMode::Both,
            min_states: 3,
        }
    }
}

/// Whether a machine passes the filters.
fn should_draw(an: &Analyzer, mid: spectra_core::MachineId, opts: &DrawOptions) -> bool {
    let m = an.machines.get(mid);
    match m.kind {
        MachineKind::Boilerplate => {}
        MachineKind::Object => {
            if opts.mode == DrawMode::FunctionsOnly {
                return false;
            }
            if !m.cause_deopt {
                // Uninteresting object families are dropped.
                if m.count_instances() <= 1 {
                    return false;
                }
                if m.size() < opts.min_states {
                    return false;
                }
                if !m.has_name() {
                    return false;
                }
            }
        }
        MachineKind::Function => {
            if opts.mode == DrawMode::ObjectsOnly {
                return false;
            }
            if !m.been_optimized {
                return false;
            }
        }
    }
    if let Some(sig) = &opts.filter {
        if !m.name().contains(sig.as_str()) {
            return false;
        }
    }
    true
}

/// Render every surviving machine into one dot document.
pub fn render(an: &Analyzer, opts: &DrawOptions) -> String {
    let mut out = String::new();
    for kind in [
        MachineKind::Boilerplate,
        MachineKind::Object,
        MachineKind::Function,
    ] {
        for m in an.machines.iter().filter(|m| m.kind == kind) {
            if should_draw(an, m.id, opts) {
                m.draw_graphviz(&an.machines, &an.shapes, &an.codes, &mut out);
            }
        }
    }
    out
}

/// Render to a dot file.
pub fn write_dot(an: &Analyzer, opts: &DrawOptions, path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(render(an, opts).as_bytes())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::run_log;

    // Two literal clones of one named boilerplate, one field apart.
    const LOG: &str = "\
0 900 1 f0 a 0
2 100 1 f0 a 900 0
2 200 1 f0 a 900 0
9 100 0 a b 0 x
";

    fn replayed() -> Analyzer {
        let mut an = Analyzer::quiet();
        run_log(&mut an, LOG, false).unwrap();
        an
    }

    #[test]
    fn test_boilerplates_always_draw() {
        let an = replayed();
        let dot = render(&an, &DrawOptions::default());
        assert!(dot.contains("digraph O"));
        assert!(dot.contains("doublecircle"));
    }

    #[test]
    fn test_object_filter_drops_single_instance_families() {
        let mut an = Analyzer::quiet();
        // One anonymous object, no deopt: filtered out.
        run_log(&mut an, "4 100 0 a 51", false).unwrap();
        let dot = render(&an, &DrawOptions::default());
        assert!(!dot.contains("egg"));
    }

    #[test]
    fn test_functions_only_mode() {
        let an = replayed();
        let opts = DrawOptions {
            mode: DrawMode::FunctionsOnly,
            ..DrawOptions::default()
        };
        let dot = render(&an, &opts);
        // The literal family (an Object machine) is suppressed; only the
        // boilerplate digraph survives.
        assert_eq!(dot.matches("digraph").count(), 1);
    }

    #[test]
    fn test_signature_filter() {
        let an = replayed();
        let opts = DrawOptions {
            filter: Some("no-such-site".to_string()),
            ..DrawOptions::default()
        };
        assert!(render(&an, &opts).is_empty());
    }

    #[test]
    fn test_tree_edges_are_solid() {
        let an = replayed();
        let dot = render(&an, &DrawOptions::default());
        assert!(dot.contains("style=solid"));
    }
}
