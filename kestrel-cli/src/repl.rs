// REPL implementation using editline
//
// Input accumulates across lines until it reads as complete datums, so a
// definition can be typed over several lines.

use std::io::Write;

use editline::{LineEditor, terminals::StdioTerminal};
use kestrel_core::parser::ParseError;
use kestrel_core::{Runtime, RuntimeError, Value};

pub fn run_repl(rt: &mut Runtime) -> Result<(), Box<dyn std::error::Error>> {
    println!("Kestrel v{}", env!("CARGO_PKG_VERSION"));
    println!("Type `(exit)` or press Ctrl-D to exit");
    println!();

    let mut editor = LineEditor::new(1024, 50);
    let mut terminal = StdioTerminal::new();
    let mut pending = String::new();

    loop {
        print!("{}", if pending.is_empty() { "> " } else { ". " });
        std::io::stdout().flush()?;

        match editor.read_line(&mut terminal) {
            Ok(line) => {
                if pending.is_empty() && line.trim() == "(exit)" {
                    break;
                }
                pending.push_str(&line);
                pending.push('\n');
                if pending.trim().is_empty() {
                    pending.clear();
                    continue;
                }

                match rt.eval_str_values(&pending) {
                    // Not a complete datum yet; keep reading
                    Err(RuntimeError::Read(ParseError::UnexpectedEndOfInput)) => continue,
                    Ok(vals) => {
                        if let Err(e) = rt.flush_output() {
                            eprintln!("Error: {}", e);
                        }
                        for value in vals.into_vec() {
                            if !matches!(value, Value::Void) {
                                println!("{}", value);
                            }
                        }
                    }
                    Err(e) => {
                        if let Err(flush) = rt.flush_output() {
                            eprintln!("Error: {}", flush);
                        }
                        eprintln!("Error: {}", e);
                    }
                }
                pending.clear();
            }
            Err(editline::Error::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(editline::Error::Interrupted) => {
                // Ctrl-C drops any partial input
                println!("^C");
                pending.clear();
                continue;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
