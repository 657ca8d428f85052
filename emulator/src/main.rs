mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Scenario, Session};

const USAGE: &str =
    "Usage: sampler-emulator [--scenario <sampling|reset|wear>] [--interactive] | sampler-emulator <scenario>";

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.scenario);

    writeln!(writer, "# {}", options.scenario.header())?;
    for line in session.boot() {
        writeln!(writer, "{line}")?;
    }

    if options.interactive {
        run_interactive(&mut session, &mut writer)
    } else {
        for command in options.scenario.script() {
            for line in session.handle_command(command) {
                writeln!(writer, "{line}")?;
            }
        }
        Ok(())
    }
}

fn run_interactive(session: &mut Session, writer: &mut impl Write) -> io::Result<()> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Sampler emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed) {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

struct Options {
    scenario: Scenario,
    interactive: bool,
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        scenario: Scenario::Sampling,
        interactive: false,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--interactive" || arg == "-i" {
            options.interactive = true;
        } else if let Some(value) = arg.strip_prefix("--scenario=") {
            options.scenario = Scenario::from_tag(value)?;
        } else if arg == "--scenario" {
            let Some(value) = args.next() else {
                return Err("Expected value after --scenario".to_string());
            };
            options.scenario = Scenario::from_tag(&value)?;
        } else {
            options.scenario = Scenario::from_tag(&arg)?;
        }
    }
    Ok(options)
}
