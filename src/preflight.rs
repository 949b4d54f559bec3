use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};
use serde::{Deserialize, Serialize};

use crate::dunning;
use crate::error::{DunnError, Result};
use crate::models::Transaction;
use crate::settings::Settings;

/// DoNotDunn codes set by the tool itself. Anything else in that column was
/// typed in by a curator and survives regeneration.
pub const CODE_EXCLUDED: &str = "[AUTODUNN] Collection excluded";
pub const CODE_ERRORS: &str = "[AUTODUNN] Contains errors";
pub const CODE_NOT_DUE: &str = "[AUTODUNN] Not due yet";
pub const CODE_NOT_IN_EXPORT: &str = "[AUTODUNN] Not in export";
pub const CODE_RECENT: &str = "[AUTODUNN] Recent interaction";

pub const AUTODUNN_CODES: &[&str] = &[
    CODE_EXCLUDED,
    CODE_ERRORS,
    CODE_NOT_DUE,
    CODE_NOT_IN_EXPORT,
    CODE_RECENT,
];

pub fn is_machine_code(code: &str) -> bool {
    AUTODUNN_CODES.contains(&code)
}

/// One row of the preflight spreadsheet. The column schema is fixed; this is
/// the only state that survives between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightRow {
    #[serde(rename = "TransactionNumber")]
    pub transaction_number: i64,
    #[serde(rename = "Catalog")]
    pub catalog: String,
    #[serde(rename = "DueDate", with = "opt_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(rename = "Level")]
    pub level: String,
    #[serde(rename = "Contact")]
    pub contact: String,
    #[serde(rename = "Organization")]
    pub organization: String,
    #[serde(rename = "SupervisorEmail")]
    pub supervisor_email: String,
    #[serde(rename = "DunnCount")]
    pub dunn_count: u32,
    #[serde(rename = "LastInteraction", with = "opt_date")]
    pub last_interaction: Option<NaiveDate>,
    #[serde(rename = "DoNotDunn")]
    pub do_not_dunn: String,
    #[serde(rename = "Errors")]
    pub errors: String,
    #[serde(rename = "Notes")]
    pub notes: String,
}

impl PreflightRow {
    /// Column-name/value pairs for field-level diffing.
    fn fields(&self) -> Vec<(&'static str, String)> {
        fn date(d: &Option<NaiveDate>) -> String {
            d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
        }
        vec![
            ("Catalog", self.catalog.clone()),
            ("DueDate", date(&self.due_date)),
            ("Level", self.level.clone()),
            ("Contact", self.contact.clone()),
            ("Organization", self.organization.clone()),
            ("SupervisorEmail", self.supervisor_email.clone()),
            ("DunnCount", self.dunn_count.to_string()),
            ("LastInteraction", date(&self.last_interaction)),
            ("DoNotDunn", self.do_not_dunn.clone()),
            ("Errors", self.errors.clone()),
            ("Notes", self.notes.clone()),
        ]
    }
}

mod opt_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match date {
            Some(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<NaiveDate>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match crate::export::parse_date(&raw) {
            Some(d) => Ok(Some(d)),
            None => Err(serde::de::Error::custom(format!("bad date: {raw}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Build fresh preflight rows from the open loans in the current export.
pub fn build_rows(
    transactions: &BTreeMap<i64, Transaction>,
    settings: &Settings,
    today: NaiveDate,
) -> Result<Vec<PreflightRow>> {
    let mut rows = Vec::new();
    for txn in transactions.values().filter(|t| t.is_open()) {
        let errors = dunning::find_errors(txn);
        let mut row = PreflightRow {
            transaction_number: txn.number,
            catalog: txn.catalog.clone(),
            due_date: txn.due_date,
            level: txn.level.title().to_string(),
            contact: txn.contact_name(),
            organization: txn.organization.clone(),
            supervisor_email: String::new(),
            dunn_count: txn.dunn_count,
            last_interaction: txn.last_interaction,
            do_not_dunn: String::new(),
            errors: errors.join("; "),
            notes: String::new(),
        };
        if !row.errors.is_empty() {
            row.do_not_dunn = CODE_ERRORS.to_string();
        } else if settings.exclude_codes.iter().any(|c| c == &txn.catalog) {
            row.do_not_dunn = CODE_EXCLUDED.to_string();
        } else if !txn.is_overdue(today) && !txn.is_almost_due(today, settings.almost_due_days) {
            row.do_not_dunn = CODE_NOT_DUE.to_string();
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(DunnError::NoLoans);
    }
    sort_rows(&mut rows);
    Ok(rows)
}

fn sort_rows(rows: &mut [PreflightRow]) {
    rows.sort_by(|a, b| b.transaction_number.cmp(&a.transaction_number));
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FieldChange {
    pub transaction_number: i64,
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Default)]
pub struct PreflightDiff {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    pub changed: Vec<FieldChange>,
}

impl PreflightDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn print(&self) {
        if self.is_empty() {
            println!("{}", "Preflight is unchanged.".green());
            return;
        }
        if !self.added.is_empty() {
            println!("Records added to preflight: {:?}", self.added);
        }
        if !self.removed.is_empty() {
            println!("Records removed from preflight: {:?}", self.removed);
        }
        if !self.changed.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Transaction", "Field", "Old", "New"]);
            for change in &self.changed {
                table.add_row(vec![
                    Cell::new(change.transaction_number),
                    Cell::new(change.field),
                    Cell::new(&change.old),
                    Cell::new(&change.new),
                ]);
            }
            println!("Changed fields\n{table}");
        }
    }
}

pub struct MergeOutcome {
    pub rows: Vec<PreflightRow>,
    pub diff: PreflightDiff,
}

/// Outer-join fresh rows with the saved table on transaction number.
///
/// Carry-over rules: SupervisorEmail and Notes always come from the saved
/// row; LastInteraction takes the more recent value; a curator-entered
/// DoNotDunn wins over a machine code. Saved rows missing from the export
/// are kept whole and flagged, never dropped.
pub fn merge(
    new_rows: &[PreflightRow],
    old_rows: &[PreflightRow],
    today: NaiveDate,
    recent_days: i64,
) -> MergeOutcome {
    let old_by_number: BTreeMap<i64, &PreflightRow> = old_rows
        .iter()
        .map(|r| (r.transaction_number, r))
        .collect();

    let mut merged = Vec::with_capacity(new_rows.len());
    let mut seen = BTreeSet::new();

    for new in new_rows {
        let mut row = new.clone();
        if let Some(old) = old_by_number.get(&row.transaction_number) {
            row.supervisor_email = old.supervisor_email.clone();
            row.notes = old.notes.clone();
            if old.last_interaction > row.last_interaction {
                row.last_interaction = old.last_interaction;
            }
            if !old.do_not_dunn.is_empty() && !is_machine_code(&old.do_not_dunn) {
                row.do_not_dunn = old.do_not_dunn.clone();
            }
        }
        if row.do_not_dunn.is_empty() && is_recent(row.last_interaction, today, recent_days) {
            row.do_not_dunn = CODE_RECENT.to_string();
        }
        seen.insert(row.transaction_number);
        merged.push(row);
    }

    for old in old_rows {
        if seen.contains(&old.transaction_number) {
            continue;
        }
        let mut row = old.clone();
        if row.do_not_dunn.is_empty() {
            row.do_not_dunn = CODE_NOT_IN_EXPORT.to_string();
        }
        merged.push(row);
    }

    sort_rows(&mut merged);
    let diff = diff_rows(&merged, old_rows);
    MergeOutcome { rows: merged, diff }
}

fn is_recent(last: Option<NaiveDate>, today: NaiveDate, recent_days: i64) -> bool {
    match last {
        Some(d) => (today - d).num_days() < recent_days,
        None => false,
    }
}

fn diff_rows(merged: &[PreflightRow], old_rows: &[PreflightRow]) -> PreflightDiff {
    let merged_by: BTreeMap<i64, &PreflightRow> = merged
        .iter()
        .map(|r| (r.transaction_number, r))
        .collect();
    let old_by: BTreeMap<i64, &PreflightRow> = old_rows
        .iter()
        .map(|r| (r.transaction_number, r))
        .collect();

    let mut diff = PreflightDiff {
        added: merged_by
            .keys()
            .filter(|n| !old_by.contains_key(n))
            .copied()
            .collect(),
        removed: old_by
            .keys()
            .filter(|n| !merged_by.contains_key(n))
            .copied()
            .collect(),
        changed: Vec::new(),
    };

    for (number, new) in &merged_by {
        let Some(old) = old_by.get(number) else {
            continue;
        };
        for ((field, new_val), (_, old_val)) in new.fields().iter().zip(old.fields().iter()) {
            if new_val != old_val {
                diff.changed.push(FieldChange {
                    transaction_number: *number,
                    field,
                    old: old_val.clone(),
                    new: new_val.clone(),
                });
            }
        }
    }
    diff
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load the saved preflight table. None means no table exists yet.
pub fn load(path: &Path) -> Result<Option<Vec<PreflightRow>>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::Reader::from_reader(std::io::BufReader::new(file));
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(Some(rows))
}

fn write_rows(rows: &[PreflightRow], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Save the table, prompting to retry when the file is locked by a
/// spreadsheet program. Non-interactive callers fail instead of prompting.
pub fn save(rows: &[PreflightRow], path: &Path, interactive: bool) -> Result<()> {
    let mut sorted = rows.to_vec();
    sort_rows(&mut sorted);
    loop {
        match write_rows(&sorted, path) {
            Ok(()) => return Ok(()),
            Err(err) => {
                if !interactive {
                    return Err(err);
                }
                let retry = dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Could not save {} ({err}). Close the file and retry?",
                        path.display()
                    ))
                    .default(true)
                    .interact()
                    .unwrap_or(false);
                if !retry {
                    return Err(err);
                }
            }
        }
    }
}

/// Drop saved rows whose transaction no longer appears in the export.
/// Returns how many rows were removed.
pub fn remove_closed(path: &Path, active: &BTreeSet<i64>, interactive: bool) -> Result<usize> {
    let Some(rows) = load(path)? else {
        return Ok(0);
    };
    let before = rows.len();
    let kept: Vec<PreflightRow> = rows
        .into_iter()
        .filter(|r| active.contains(&r.transaction_number))
        .collect();
    let removed = before - kept.len();
    if removed > 0 {
        save(&kept, path, interactive)?;
    }
    Ok(removed)
}
