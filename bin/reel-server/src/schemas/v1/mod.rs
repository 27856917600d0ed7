pub mod command;
pub mod file;
pub mod task;

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
