use chrono::Local;
use env_logger::fmt::{Color, Style, StyledValue};
use env_logger::{Builder, Logger, Target};
use log::{Level, LevelFilter};

pub(crate) fn default_logger(debug: bool, quiet: bool) -> Logger {
    let level = match (debug, quiet) {
        (true, _) => LevelFilter::Trace,
        (false, true) => LevelFilter::Warn,
        (false, false) => LevelFilter::Info,
    };

    formatted_local_time_builder("%H:%M:%S.%3f")
        .filter_level(level)
        .parse_default_env()
        .build()
}

/// Logs go to stderr, stdout is reserved for the extracted JSON.
fn formatted_local_time_builder(fmt: &'static str) -> Builder {
    let mut builder = Builder::new();
    builder.target(Target::Stderr);

    builder.format(|f, record| {
        use std::io::Write;

        let target = record.target();
        let crate_target = clap::crate_name!();

        if !(target == crate_target || target.starts_with(&format!("{crate_target}::"))) {
            return Ok(());
        }

        let mut style = f.style();
        let level = colored_level(&mut style, record.level());

        let time = Local::now().format(fmt);

        writeln!(f, "{} {} > {}", time, level, record.args())
    });

    builder
}

fn colored_level(style: &'_ mut Style, level: Level) -> StyledValue<'_, &'static str> {
    match level {
        Level::Trace => style.set_color(Color::Magenta).value("TRACE"),
        Level::Debug => style.set_color(Color::Blue).value("DEBUG"),
        Level::Info => style.set_color(Color::Green).value("INFO "),
        Level::Warn => style.set_color(Color::Yellow).value("WARN "),
        Level::Error => style.set_color(Color::Red).value("ERROR"),
    }
}
