//! Kestrel CLI - command-line REPL and script runner
//!
//! This is a thin wrapper around kestrel-core. Given a file it runs the file,
//! given `-e` it evaluates one expression, otherwise it starts the REPL.

mod repl;

use std::process::ExitCode;

use clap::Parser;
use kestrel_core::{Runtime, RuntimeConfig, StdoutOutput, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Kestrel: a tail-calling Scheme-like language machine")]
struct Cli {
    /// Script file to run
    file: Option<String>,

    /// Evaluate an expression and print its result
    #[arg(short, long)]
    eval: Option<String>,

    /// Disable the environment-sharing shortcut
    #[arg(long)]
    no_env_sharing: bool,

    /// Store every pair boxed, never with an unboxed fixnum car
    #[arg(long)]
    no_cons_specialization: bool,

    /// Store every vector as plain objects
    #[arg(long)]
    no_vector_strategies: bool,

    /// Print evaluation statistics to stderr when done
    #[arg(long)]
    stats: bool,
}

impl Cli {
    // Flags only ever switch things off; the environment sets the baseline
    fn config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::from_env();
        if self.no_env_sharing {
            config.env_sharing = false;
        }
        if self.no_cons_specialization {
            config.cons_specialization = false;
        }
        if self.no_vector_strategies {
            config.vector_strategies = false;
        }
        let trace_stats = self.stats || config.trace_stats;
        config.with_trace_stats(trace_stats)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut rt = Runtime::with_config(cli.config());
    rt.set_output(Box::new(StdoutOutput::new()));

    let status = if let Some(expr) = &cli.eval {
        run_source(&mut rt, expr, true)
    } else if let Some(file) = &cli.file {
        match std::fs::read_to_string(file) {
            Ok(content) => run_source(&mut rt, &content, false),
            Err(e) => {
                eprintln!("Error reading {}: {}", file, e);
                ExitCode::FAILURE
            }
        }
    } else {
        match repl::run_repl(&mut rt) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    };

    if cli.stats {
        let stats = rt.stats();
        eprintln!(
            "steps: {}  max continuation depth: {}  environment shares: {}",
            stats.steps, stats.max_cont_depth, stats.env_shares
        );
    }
    status
}

fn run_source(rt: &mut Runtime, src: &str, print_result: bool) -> ExitCode {
    let result = rt.eval_str_values(src);
    let flushed = rt.flush_output();
    let result = result.and_then(|vals| flushed.map(|()| vals));
    match result {
        Ok(vals) => {
            if print_result {
                for value in vals.into_vec() {
                    if !matches!(value, Value::Void) {
                        println!("{}", value);
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
