mod args;
mod driver;
mod peaklist;
mod write;

pub use args::*;
pub use driver::{MZFormulator, MZFormulatorError};
pub use peaklist::{PeakListError, PeakListReader};
pub use write::{element_columns, export_rows, write_json, write_tsv, ExportRow, COLUMNS};
