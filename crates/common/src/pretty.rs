//! Rendering of result batches for the interactive surfaces.

use crate::RecordBatch;
use tabled::{builder::Builder, settings, Table};
use types::Value;

/// Predefined output styles that map to `tabled` styles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Ascii,
    Modern,
    Plain,
}

impl TableStyleKind {
    fn apply(self, table: &mut Table) {
        match self {
            Self::Ascii => table.with(settings::Style::ascii()),
            Self::Modern => table.with(settings::Style::modern()),
            Self::Plain => table.with(settings::Style::empty()),
        };
    }
}

/// Render a `RecordBatch` into a human-friendly table string.
pub fn render_record_batch(batch: &RecordBatch, style: TableStyleKind) -> String {
    if batch.columns.is_empty() && batch.rows.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();
    builder.push_record(batch.columns.iter().cloned());
    for row in &batch.rows {
        builder.push_record(row.iter().map(format_value));
    }

    let mut table = builder.build();
    style.apply(&mut table);
    table.to_string()
}

/// Format a full row into a comma-separated string.
pub fn format_row(values: &[Value]) -> String {
    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

/// Format a single value for display.
pub fn format_value(value: &Value) -> String {
    value.to_string()
}
