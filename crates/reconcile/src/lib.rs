mod dates;
mod enrich;
mod extract;
mod pipeline;
mod tracking;
mod types;

pub use dates::parse_log_date;
pub use enrich::enrich_from_stats;
pub use extract::{STAGE_ONE_MARKERS, extract_stats_file};
pub use pipeline::{reconcile_full, reconcile_incremental, tracking_path_for};
pub use tracking::{SchedulePolicy, import_tracking_file};
pub use types::{ReconcileError, ReconcileStats, Result};
