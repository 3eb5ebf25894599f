//! Plain-text report of the profiling registry.
//!
//! One row per callback plus a totals row:
//!
//! ```text
//! Runtime(ms)     Calls  Avg(us)  Max(us) Type   Task
//!       0.460         3      153      300   T E  lsp_refresh
//! ```

use crate::profiler::{ProfileRecord, ProfilingRegistry};
use crate::scheduler::{KindSet, TaskKind};
use std::fmt::Write;

/// Categories shown in the Type column, in column order.
const TYPE_COLUMNS: [TaskKind; 6] = [
    TaskKind::Read,
    TaskKind::Write,
    TaskKind::Timer,
    TaskKind::Event,
    TaskKind::Execute,
    TaskKind::Background,
];

const HEADER: &str = "Runtime(ms)     Calls  Avg(us)  Max(us) Type   Task";

fn type_letters(kinds: KindSet) -> String {
    TYPE_COLUMNS
        .iter()
        .map(|k| if kinds.contains(*k) { k.letter() } else { ' ' })
        .collect()
}

fn write_row(out: &mut String, r: &ProfileRecord) {
    let _ = writeln!(
        out,
        "{:>7}.{:03} {:>9} {:>8} {:>8} {} {}",
        r.total_us / 1000,
        r.total_us % 1000,
        r.total_calls,
        r.avg_us(),
        r.max_us,
        type_letters(r.kinds),
        r.name
    );
}

impl ProfilingRegistry {
    /// Render the records whose categories intersect `filter`.
    pub fn render_report(&self, filter: KindSet) -> String {
        let mut output = String::new();
        output.push_str(HEADER);
        output.push('\n');

        for (_, record) in self.records() {
            if record.kinds.intersects(filter) {
                write_row(&mut output, record);
            }
        }

        let totals = self.totals(filter);
        if totals.total_calls > 0 {
            write_row(&mut output, &totals);
        }
        output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
