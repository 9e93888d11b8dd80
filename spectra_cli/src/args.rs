//! Command-line argument parser.
//!
//! Hand-rolled for zero-overhead startup; the flag set is small and fixed.

use spectra_replay::DrawMode;
use std::path::PathBuf;

// =============================================================================
// Exit codes
// =============================================================================

/// Successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Replay or output failure.
pub const EXIT_ERROR: u8 = 1;
/// Bad command line.
pub const EXIT_USAGE_ERROR: u8 = 2;

// =============================================================================
// Parsed arguments
// =============================================================================

/// What the binary should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Replay the log and emit the drawing.
    Run,
    /// Print usage and exit.
    PrintHelp,
    /// Print the version and exit.
    PrintVersion,
}

/// Complete set of parsed options.
#[derive(Debug, Clone)]
pub struct SpectraArgs {
    /// Execution mode.
    pub mode: Mode,
    /// Input log path.
    pub input: Option<PathBuf>,
    /// Output dot path.
    pub output: PathBuf,
    /// Draw-filter signature: only machines whose name contains it.
    pub filter: Option<String>,
    /// Which machine kinds to draw.
    pub draw_mode: DrawMode,
    /// Minimum states+edges for quiet object machines.
    pub min_states: usize,
    /// Event-by-event trace on stderr.
    pub debug: bool,
    /// Run deopt diagnosis.
    pub analyze: bool,
}

impl Default for SpectraArgs {
    fn default() -> Self {
        Self {
            mode: Mode::Run,
            input: None,
            output: PathBuf::from("typestate.dot"),
            filter: None,
            draw_mode: DrawMode::Both,
            min_states: 3,
            debug: false,
            analyze: false,
        }
    }
}

// =============================================================================
// Parse errors
// =============================================================================

/// Error during argument parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// A flag was missing its value.
    MissingValue(&'static str),
    /// An unrecognized flag.
    UnknownFlag(String),
    /// A value did not parse.
    BadValue(&'static str, String),
    /// More than one input path.
    ExtraInput(String),
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::MissingValue(flag) => write!(f, "argument expected for the {} option", flag),
            ArgError::UnknownFlag(flag) => write!(f, "unknown option: {}", flag),
            ArgError::BadValue(flag, value) => {
                write!(f, "bad value for the {} option: {}", flag, value)
            }
            ArgError::ExtraInput(arg) => write!(f, "unexpected extra input: {}", arg),
        }
    }
}

impl std::error::Error for ArgError {}

// =============================================================================
// Parser
// =============================================================================

/// Parse command-line arguments (excluding the program name).
pub fn parse_args(args: &[String]) -> Result<SpectraArgs, ArgError> {
    let mut result = SpectraArgs::default();
    let mut i = 0;

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-h" | "--help" => {
                result.mode = Mode::PrintHelp;
                return Ok(result);
            }
            "-V" | "--version" => {
                result.mode = Mode::PrintVersion;
                return Ok(result);
            }
            "-o" => {
                i += 1;
                let value = args.get(i).ok_or(ArgError::MissingValue("-o"))?;
                result.output = PathBuf::from(value);
            }
            "-s" => {
                i += 1;
                let value = args.get(i).ok_or(ArgError::MissingValue("-s"))?;
                result.filter = Some(value.clone());
            }
            "-m" => {
                i += 1;
                let value = args.get(i).ok_or(ArgError::MissingValue("-m"))?;
                result.min_states = value
                    .parse()
                    .map_err(|_| ArgError::BadValue("-m", value.clone()))?;
            }
            "-d" | "--debug" => result.debug = true,
            "-a" | "--analyze" => result.analyze = true,
            "--objects-only" => result.draw_mode = DrawMode::ObjectsOnly,
            "--functions-only" => result.draw_mode = DrawMode::FunctionsOnly,
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(ArgError::UnknownFlag(arg.to_string()));
            }
            _ => {
                if result.input.is_some() {
                    return Err(ArgError::ExtraInput(arg.to_string()));
                }
                result.input = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(result)
}

/// Usage text.
pub fn help_text() -> String {
    format!(
        r#"usage: spectra [options] <trace.log>

Replay an instrumented-engine trace, reconstruct the typestate automata,
and draw them as GraphViz.

Options:
-o file : write the drawing to file (default: typestate.dot)
-s sig  : only draw machines whose name contains sig
-m n    : drop quiet object machines smaller than n states+edges (default: 3)
-a      : run deoptimization diagnosis (also --analyze)
-d      : trace every event on stderr (also --debug)
--objects-only   : draw object machines only
--functions-only : draw function machines only
-h      : print this help message and exit (also --help)
-V      : print the version and exit (also --version)

spectra {}"#,
        spectra_core::VERSION
    )
}

/// Version line.
pub fn version_string() -> String {
    format!("spectra {}", spectra_core::VERSION)
}

// =============================================================================
// Tests
// =============================================================================
