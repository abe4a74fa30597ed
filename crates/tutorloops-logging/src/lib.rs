//! Observability for tutorloops runs.
//!
//! Two separate channels come out of this crate: process diagnostics
//! through `tracing` (see [`init_tracing`]) and the run's own record, which
//! [`Logger`] prints as [`LogEvent`]s and [`RunWriter`] appends to a JSONL
//! results file that `tutorloops stats` can read back later.

mod events;
mod run;

pub use events::{AdapterRole, LogEvent, LogFormat, Logger};
pub use run::RunWriter;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// File name used for the diagnostics trace under `trace_dir`
pub const TRACE_FILE_NAME: &str = "tutorloops.trace.jsonl";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Console output goes to stderr so stdout stays free for reports. When
/// `trace_dir` is given every event is also appended there as JSON; keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn init_tracing(level: &str, format: LogFormat, trace_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console: BoxedLayer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let mut layers = vec![console];

    let guard = trace_dir.map(|dir| {
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, TRACE_FILE_NAME));
        layers.push(fmt::layer().json().with_writer(writer).boxed());
        guard
    });

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    guard
}
