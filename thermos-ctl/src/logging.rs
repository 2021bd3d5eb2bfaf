use console::{StyledObject, style};
use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use std::io::Write;

/// Short component name for a log target, `thermos_executor::runner` -> `executor`
pub fn component(target: &str) -> &str {
    let krate = target.split("::").next().unwrap_or(target);
    match krate.strip_prefix("thermos_") {
        Some(rest) if !rest.is_empty() => rest,
        _ => krate,
    }
}

fn level_letter(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}

fn level_label(level: Level) -> StyledObject<&'static str> {
    let label = style(level_letter(level));
    match level {
        Level::Error => label.red().bold(),
        Level::Warn => label.yellow().bold(),
        Level::Info => label.green(),
        Level::Debug => label.cyan(),
        Level::Trace => label.dim(),
    }
}

/// Initialize logger; `RUST_LOG` overrides the verbose flag.
///
/// Lines read `<time> <level> [<component>] <message>`. Verbose output also
/// carries the executor pid after the component.
pub fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = Env::default().filter_or("RUST_LOG", default);
    let pid = std::process::id();

    Builder::new()
        .format(move |buf, record| {
            let ts = buf.timestamp_millis();
            let label = level_label(record.level());
            let component = style(component(record.target())).dim();
            if verbose {
                writeln!(buf, "{} {} [{}:{}] {}", ts, label, component, pid, record.args())
            } else {
                writeln!(buf, "{} {} [{}] {}", ts, label, component, record.args())
            }
        })
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_env(env)
        .init();
}
