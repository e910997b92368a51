//! Tracing setup shared by the helm-oss binaries.
//!
//! Log lines always go to stderr (or a file), never stdout: when running as a
//! Helm downloader plugin, stdout carries the fetched object bytes.

use std::{
    env,
    io::{self, Write},
    path::Path,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    File,
    Both,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stderr,
        }
    }
}

/// Logging settings, read from the environment.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub file_path: String,
}

impl LogSettings {
    /// Reads `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT` and `LOG_FILE_PATH`.
    ///
    /// `verbose` raises the default level to `debug` unless `LOG_LEVEL` is set.
    pub fn from_env(verbose: bool) -> Self {
        let default_level = if verbose { "debug" } else { "warn" };
        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string()),
            output: LogOutput::parse(&env::var("LOG_OUTPUT").unwrap_or_default()),
            json: env::var("LOG_FORMAT").is_ok_and(|f| f == "json"),
            file_path: env::var("LOG_FILE_PATH")
                .unwrap_or_else(|_| "/tmp/helm-oss.log".to_string()),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in ["tokio=warn", "hyper=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Initializes the global tracing subscriber.
///
/// The returned guard must be held until exit so buffered lines get flushed.
pub fn init_subscriber(verbose: bool) -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env(verbose))
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let subscriber = registry().with(settings.env_filter());

    let log_path = Path::new(&settings.file_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = log_path.file_name().unwrap_or("helm-oss.log".as_ref());

    let (stderr, stderr_guard) = tracing_appender::non_blocking(io::stderr());

    match settings.output {
        LogOutput::Stderr => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(stderr)
                .with_target(false);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(stderr_guard)
        }
        LogOutput::File => {
            drop(stderr_guard);
            let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
            let (file, file_guard) = tracing_appender::non_blocking(file_appender);
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(file_guard)
        }
        LogOutput::Both => {
            // Only one guard can be returned; the stderr worker is leaked so
            // it keeps flushing until the process exits.
            std::mem::forget(stderr_guard);
            let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
            let (file, file_guard) = tracing_appender::non_blocking(file_appender);
            let tee_writer = MakeTee {
                make_a: stderr,
                make_b: file,
            };
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(tee_writer)
                .with_ansi(false);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(file_guard)
        }
    }
}
