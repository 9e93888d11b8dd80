//! Spectra: offline hidden-class and deoptimization analyzer for JIT traces.

mod args;

use args::{Mode, SpectraArgs, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE_ERROR};
use spectra_core::Analyzer;
use spectra_replay::{handlers, visualize, DrawOptions};
use std::process::ExitCode;

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match args::parse_args(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("spectra: {}", err);
            eprintln!("{}", args::help_text());
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    };

    match parsed.mode {
        Mode::PrintHelp => {
            println!("{}", args::help_text());
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::PrintVersion => {
            println!("{}", args::version_string());
            ExitCode::from(EXIT_SUCCESS)
        }
        Mode::Run => run(&parsed),
    }
}

fn run(opts: &SpectraArgs) -> ExitCode {
    let Some(input) = &opts.input else {
        eprintln!("spectra: no input log");
        eprintln!("{}", args::help_text());
        return ExitCode::from(EXIT_USAGE_ERROR);
    };

    let mut analyzer = Analyzer::new();
    analyzer.analyze = opts.analyze;

    let events = match handlers::replay_file(&mut analyzer, input, opts.debug) {
        Ok(events) => events,
        Err(err) => {
            eprintln!("spectra: {}", err);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    if opts.debug {
        eprintln!("total events = {}", events);
    }

    let draw = DrawOptions {
        filter: opts.filter.clone(),
        mode: opts.draw_mode,
        min_states: opts.min_states,
    };
    if let Err(err) = visualize::write_dot(&analyzer, &draw, &opts.output) {
        eprintln!("spectra: cannot write {}: {}", opts.output.display(), err);
        return ExitCode::from(EXIT_ERROR);
    }

    ExitCode::from(EXIT_SUCCESS)
}
