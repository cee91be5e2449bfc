//! CSV export of stored leads.

use crate::models::{full_address, Lead, LeadFilter};
use crate::normalize::format_phone_display;
use chrono::NaiveDate;
use std::io;
use std::path::{Path, PathBuf};

pub const CSV_HEADERS: [&str; 11] = [
    "Company Name",
    "Contact Name",
    "Email",
    "Phone",
    "Website",
    "Address",
    "Trade",
    "Source",
    "Notes",
    "Status",
    "Lead Score",
];

/// Export selection: duplicates are left out unless a status filter asks
/// for them explicitly.
pub fn export_filter(filter: LeadFilter) -> LeadFilter {
    LeadFilter {
        exclude_duplicates: filter.exclude_duplicates || filter.statuses.is_empty(),
        ..filter
    }
}

/// `dir/leads-YYYY-MM-DD.csv`
pub fn default_export_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("leads-{}.csv", date.format("%Y-%m-%d")))
}

fn row(lead: &Lead) -> [String; 11] {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        lead.company_name.clone(),
        text(&lead.contact_name),
        text(&lead.email),
        lead.phone.as_deref().map(format_phone_display).unwrap_or_default(),
        text(&lead.website),
        full_address(lead).unwrap_or_default(),
        lead.trade.clone(),
        lead.source.to_string(),
        lead.notes
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        lead.status.as_str().to_string(),
        lead.lead_score.map(|s| s.to_string()).unwrap_or_default(),
    ]
}

/// Writes a header row plus one row per lead. Returns the row count.
pub fn write_csv<W: io::Write>(writer: W, leads: &[Lead]) -> Result<usize, csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADERS)?;
    for lead in leads {
        csv.write_record(row(lead))?;
    }
    csv.flush()?;
    Ok(leads.len())
}
