//! Scripted walkthrough of spec.md §8's end-to-end scenarios (S1-S6),
//! driven through the same command grammar the REPL uses.

use hub_core::HubConfig;
use tracing::info;

use crate::commands::Session;

struct Step {
    narration: &'static str,
    line: &'static str,
}

const SCRIPT: &[Step] = &[
    Step { narration: "S1: range-limited observation", line: "input /a/temp num celsius" },
    Step { narration: "", line: "obs /obs/hot" },
    Step { narration: "", line: "limit /obs/hot high 30" },
    Step { narration: "", line: "source /obs/hot /a/temp" },
    Step { narration: "", line: "push /a/temp num 20.5" },
    Step { narration: "", line: "push /a/temp num 35.0" },
    Step { narration: "current value of /obs/hot after the in-range push:", line: "value /obs/hot" },
    Step { narration: "", line: "push /a/temp num 25.0" },
    Step { narration: "unchanged after the out-of-range push:", line: "value /obs/hot" },
    Step { narration: "S2: deadband observation", line: "obs /obs/dead" },
    Step { narration: "", line: "limit /obs/dead low 10" },
    Step { narration: "", line: "limit /obs/dead high 5" },
    Step { narration: "rejected (inside the deadband):", line: "push /obs/dead num 7" },
    Step { narration: "accepted:", line: "push /obs/dead num 4" },
    Step { narration: "accepted:", line: "push /obs/dead num 11" },
    Step { narration: "S3: mean transform over a capped buffer", line: "obs /obs/avg" },
    Step { narration: "", line: "transform /obs/avg mean" },
    Step { narration: "", line: "maxcount /obs/avg 3" },
    Step { narration: "", line: "push /obs/avg num 1.0" },
    Step { narration: "", line: "push /obs/avg num 2.0" },
    Step { narration: "", line: "push /obs/avg num 3.0" },
    Step { narration: "", line: "push /obs/avg num 4.0" },
    Step { narration: "reported current value (mean of the buffered [2,3,4]):", line: "value /obs/avg" },
    Step { narration: "S5: JSON extraction", line: "obs /obs/extract" },
    Step { narration: "", line: "extract /obs/extract sensor.temp" },
    Step { narration: "", line: r#"push /obs/extract json {"sensor":{"temp":21.5}}"# },
    Step { narration: "current value is Numeric 21.5:", line: "value /obs/extract" },
    Step { narration: "S6: streaming reader over a buffered observation", line: "obs /obs/log" },
    Step { narration: "", line: "maxcount /obs/log 10" },
    Step { narration: "", line: "push /obs/log str a" },
    Step { narration: "", line: "push /obs/log str b" },
    Step { narration: "buffer rendered as a JSON array:", line: "read /obs/log" },
];

pub fn run(config: HubConfig) -> anyhow::Result<()> {
    let mut session = Session::new(config);
    for step in SCRIPT {
        if !step.narration.is_empty() {
            println!("-- {}", step.narration);
        }
        info!(command = step.line, "demo step");
        match session.execute(step.line)? {
            Some(output) => println!("{} => {output}", step.line),
            None => println!("{}", step.line),
        }
    }
    Ok(())
}
