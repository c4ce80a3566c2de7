use anyhow::{Context, Result};
use chrono::NaiveDate;
use facelog_core::ledger::{self, AttendanceRecord};
use facelog_core::store;
use facelog_core::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub user_id: u32,
    pub name: String,
    pub samples: usize,
}

/// Enrolled users with the number of dataset samples each one has on disk.
pub fn users(config: &Config) -> Result<Vec<UserEntry>> {
    let labels = store::load_label_map_or_default(config)?;
    labels
        .into_iter()
        .map(|(user_id, name)| {
            let dir = config.dataset_dir_for(user_id);
            let samples = if dir.is_dir() {
                store::list_samples(&dir)?.len()
            } else {
                0
            };
            Ok(UserEntry { user_id, name, samples })
        })
        .collect()
}

/// Attendance rows for `date`; a day without a file has no rows.
pub fn report(config: &Config, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
    let path = config.attendance_path_for(date);
    ledger::read_attendance(&path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn print_users(entries: &[UserEntry]) {
    if entries.is_empty() {
        println!("No users registered");
        return;
    }
    println!("{:>8}  {:<24}  {:>7}", "ID", "NAME", "SAMPLES");
    for e in entries {
        println!("{:>8}  {:<24}  {:>7}", e.user_id, e.name, e.samples);
    }
}

pub fn print_report(date: NaiveDate, records: &[AttendanceRecord]) {
    println!("Attendance for {date}: {} record(s)", records.len());
    for r in records {
        println!("{}  {:>8}  {}", r.timestamp, r.user_id, r.name);
    }
}
