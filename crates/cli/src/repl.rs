use std::io::{self, BufRead, Write};

use hub_core::HubConfig;
use tracing::error;

use crate::commands::Session;

/// Read commands from stdin one per line until EOF, `quit`, or `exit`.
pub fn run(config: HubConfig) -> anyhow::Result<()> {
    let mut session = Session::new(config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!("hub-cli REPL — type `help` for commands, `quit` to exit.");
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }

        match session.execute(line) {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "command failed");
                println!("error: {e:#}");
            }
        }
    }
    Ok(())
}
