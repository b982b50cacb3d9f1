//! Leveled, colored terminal output
//!
//! ERROR HANDLING STRATEGY FOR DECORATIVE I/O:
//! All termcolor operations use `let _ =` to deliberately ignore errors.
//! Colored output is decorative and non-essential. If stderr/stdout is unavailable
//! (broken pipe, no TTY, etc.), the program continues without colors.
//!
//! Status lines go to stdout unless [`status_to_stderr`] was called, which
//! keeps stdout free for machine-readable output such as `--json`.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

static STATUS_TO_STDERR: AtomicBool = AtomicBool::new(false);

/// Route `info!`, `success!`, banners and the summary table to stderr.
pub fn status_to_stderr(enabled: bool) {
    STATUS_TO_STDERR.store(enabled, Ordering::Relaxed);
}

#[must_use]
pub fn status_on_stderr() -> bool {
    STATUS_TO_STDERR.load(Ordering::Relaxed)
}

/// Writer for non-error status output.
#[must_use]
pub fn status_writer() -> BufferWriter {
    if status_on_stderr() {
        BufferWriter::stderr(ColorChoice::Auto)
    } else {
        BufferWriter::stdout(ColorChoice::Auto)
    }
}

/// Macro for printing informational lines with a blue marker
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        let bufwtr = $crate::log::status_writer();
        let mut buffer = bufwtr.buffer();
        let _ = ::termcolor::WriteColor::set_color(
            &mut buffer,
            ::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Blue)),
        );
        let _ = ::std::io::Write::write_all(&mut buffer, "ℹ ".as_bytes());
        let _ = ::termcolor::WriteColor::reset(&mut buffer);
        let _ = ::std::io::Write::write_fmt(&mut buffer, format_args!($($arg)*));
        let _ = ::std::io::Write::write_all(&mut buffer, b"\n");
        let _ = bufwtr.print(&buffer);
    }};
}

/// Macro for printing success messages with green color
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {{
        let bufwtr = $crate::log::status_writer();
        let mut buffer = bufwtr.buffer();
        let _ = ::termcolor::WriteColor::set_color(
            &mut buffer,
            ::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Green)),
        );
        let _ = ::std::io::Write::write_all(&mut buffer, "✓ ".as_bytes());
        let _ = ::termcolor::WriteColor::reset(&mut buffer);
        let _ = ::std::io::Write::write_fmt(&mut buffer, format_args!($($arg)*));
        let _ = ::std::io::Write::write_all(&mut buffer, b"\n");
        let _ = bufwtr.print(&buffer);
    }};
}

/// Macro for printing warnings with yellow color
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = ::termcolor::WriteColor::set_color(
            &mut buffer,
            ::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Yellow)),
        );
        let _ = ::std::io::Write::write_all(&mut buffer, "⚠️  ".as_bytes());
        let _ = ::termcolor::WriteColor::reset(&mut buffer);
        let _ = ::std::io::Write::write_fmt(&mut buffer, format_args!($($arg)*));
        let _ = ::std::io::Write::write_all(&mut buffer, b"\n");
        let _ = bufwtr.print(&buffer);
    }};
}

/// Macro for printing errors with red color
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = ::termcolor::WriteColor::set_color(
            &mut buffer,
            ::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Red)),
        );
        let _ = ::std::io::Write::write_all(&mut buffer, "❌ ".as_bytes());
        let _ = ::termcolor::WriteColor::reset(&mut buffer);
        let _ = ::std::io::Write::write_fmt(&mut buffer, format_args!($($arg)*));
        let _ = ::std::io::Write::write_all(&mut buffer, b"\n");
        let _ = bufwtr.print(&buffer);
    }};
}

/// Print a bold section banner, e.g. at the start of each pipeline stage.
pub fn section(title: &str) {
    let bufwtr = status_writer();
    let mut buffer = bufwtr.buffer();
    let _ = buffer.set_color(ColorSpec::new().set_bold(true));
    let _ = writeln!(&mut buffer, "\n{}", "=".repeat(60));
    let _ = writeln!(&mut buffer, "{title}");
    let _ = writeln!(&mut buffer, "{}", "=".repeat(60));
    let _ = buffer.reset();
    let _ = bufwtr.print(&buffer);
}

/// Print `label: value` rows with aligned labels. Used for the audit summary.
pub fn key_values(rows: &[(&str, String)]) {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    let bufwtr = status_writer();
    let mut buffer = bufwtr.buffer();
    for (key, value) in rows {
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
        let _ = write!(&mut buffer, "   {key:<width$}");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, "  {value}");
    }
    let _ = bufwtr.print(&buffer);
}
