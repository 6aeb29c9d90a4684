//! The interactive prompt.
//!
//! Each non-empty line is submitted as one statement batch (semicolon-
//! separated statements run in a single transaction). `exit` or EOF
//! ends the session.

use liminaldb_core::{sql, Engine};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

pub fn run(engine: &Engine) -> anyhow::Result<()> {
    let mut editor = Editor::<(), DefaultHistory>::new()?;
    let history = dirs_path();
    if let Some(history) = &history {
        let _ = editor.load_history(history);
    }

    loop {
        match editor.readline("liminaldb> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") {
                    break;
                }
                editor.add_history_entry(line).ok();
                match sql::execute_sql(engine, line) {
                    Ok(output) => println!("{output}"),
                    Err(e) => eprintln!("ERROR: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::error!("readline failed: {e}");
                break;
            }
        }
    }

    if let Some(history) = &history {
        editor.save_history(history).ok();
    }
    Ok(())
}

fn dirs_path() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(|home| std::path::PathBuf::from(home).join(".liminaldb_history"))
}
