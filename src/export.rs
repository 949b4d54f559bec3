use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::error::{DunnError, Result};
use crate::models::{Contact, Level, LoanItem, Transaction};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}

fn parse_count(raw: &str) -> u32 {
    raw.trim().parse().unwrap_or(0)
}

#[cfg(any(feature = "xlsx", test))]
pub fn excel_serial_to_date(serial: f64) -> String {
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap();
    let date = base + chrono::Duration::days(serial as i64);
    date.format("%Y-%m-%d").to_string()
}

/// SHA-256 of the export file, used to tie tracking files to one export
/// generation.
pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Export formats — enum dispatch instead of trait objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportFormat {
    Csv,
    #[cfg(feature = "xlsx")]
    Xlsx,
}

impl ExportFormat {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            #[cfg(feature = "xlsx")]
            Self::Xlsx => "xlsx",
        }
    }

    pub fn detect(&self, file_path: &Path) -> bool {
        let ext = file_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match self {
            Self::Csv => ext == "csv",
            #[cfg(feature = "xlsx")]
            Self::Xlsx => ext == "xlsx",
        }
    }

    fn parse(&self, file_path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        match self {
            Self::Csv => parse_csv(file_path),
            #[cfg(feature = "xlsx")]
            Self::Xlsx => parse_xlsx(file_path),
        }
    }
}

#[cfg(feature = "xlsx")]
const ALL_FORMATS: &[ExportFormat] = &[ExportFormat::Csv, ExportFormat::Xlsx];
#[cfg(not(feature = "xlsx"))]
const ALL_FORMATS: &[ExportFormat] = &[ExportFormat::Csv];

pub fn get_by_key(key: &str) -> Option<ExportFormat> {
    ALL_FORMATS.iter().find(|f| f.key() == key).copied()
}

pub fn get_for_file(file_path: &Path) -> Option<ExportFormat> {
    ALL_FORMATS.iter().find(|f| f.detect(file_path)).copied()
}

// ---------------------------------------------------------------------------
// Raw parsers
// ---------------------------------------------------------------------------

fn parse_csv(file_path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok((headers, rows))
}

#[cfg(feature = "xlsx")]
fn parse_xlsx(file_path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    use calamine::{Data, Reader};

    fn cell_to_string(cell: &Data) -> String {
        match cell {
            Data::String(s) => s.trim().to_string(),
            Data::Float(f) => {
                if f.fract() == 0.0 {
                    format!("{}", *f as i64)
                } else {
                    format!("{f}")
                }
            }
            Data::Int(i) => format!("{i}"),
            Data::Bool(b) => if *b { "Y" } else { "" }.to_string(),
            Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
            _ => String::new(),
        }
    }

    let mut workbook = calamine::open_workbook_auto(file_path)
        .map_err(|e| DunnError::Other(format!("Failed to open XLSX: {e}")))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DunnError::Other("XLSX export has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| DunnError::Other(format!("Failed to read sheet {sheet}: {e}")))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .map(|r| r.iter().map(cell_to_string).collect())
        .unwrap_or_default();
    let rows = rows_iter
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();
    Ok((headers, rows))
}

// ---------------------------------------------------------------------------
// Assembly — one export row per loan item, grouped by transaction number
// ---------------------------------------------------------------------------

struct ColumnMap {
    index: HashMap<String, usize>,
}

impl ColumnMap {
    fn new(headers: &[String]) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self { index }
    }

    fn require(&self, name: &str) -> Result<()> {
        if self.index.contains_key(name) {
            Ok(())
        } else {
            Err(DunnError::MissingColumn(name.to_string()))
        }
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.index
            .get(name)
            .and_then(|&i| row.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

fn parse_contact(cols: &ColumnMap, row: &[String], prefix: &str) -> Option<Contact> {
    let contact = Contact {
        title: cols.get(row, &format!("{prefix}Title")).to_string(),
        first_name: cols.get(row, &format!("{prefix}First")).to_string(),
        last_name: cols.get(row, &format!("{prefix}Last")).to_string(),
        email: cols.get(row, &format!("{prefix}Email")).to_string(),
        affiliation: cols.get(row, &format!("{prefix}Affiliation")).to_string(),
        deceased: parse_flag(cols.get(row, &format!("{prefix}Deceased"))),
    };
    if contact.last_name.is_empty() && contact.email.is_empty() && contact.affiliation.is_empty() {
        None
    } else {
        Some(contact)
    }
}

fn assemble(headers: &[String], rows: &[Vec<String>]) -> Result<BTreeMap<i64, Transaction>> {
    let cols = ColumnMap::new(headers);
    cols.require("TransactionNumber")?;
    cols.require("Irn")?;

    let mut transactions: BTreeMap<i64, Transaction> = BTreeMap::new();
    for row in rows {
        let raw_number = cols.get(row, "TransactionNumber");
        if raw_number.is_empty() {
            continue;
        }
        let number: i64 = raw_number
            .parse()
            .map_err(|_| DunnError::BadRow(format!("bad transaction number: {raw_number}")))?;

        let txn = transactions.entry(number).or_insert_with(|| {
            let contact = parse_contact(&cols, row, "Contact");
            // The original contact on the loan paperwork; falls back to the
            // current contact when the export carries no separate record.
            let orig_contact = parse_contact(&cols, row, "OrigContact").or_else(|| contact.clone());
            Transaction {
                number,
                irn: cols.get(row, "Irn").parse().unwrap_or(0),
                catalog: cols.get(row, "Catalog").to_string(),
                level: Level::parse(cols.get(row, "Level")),
                status: cols.get(row, "Status").to_string(),
                open_date: parse_date(cols.get(row, "OpenDate")),
                due_date: parse_date(cols.get(row, "DueDate")),
                dunn_count: parse_count(cols.get(row, "DunnCount")),
                last_interaction: parse_date(cols.get(row, "LastInteraction")),
                contact,
                orig_contact,
                organization: cols.get(row, "Organization").to_string(),
                items: Vec::new(),
            }
        });

        let object_name = cols.get(row, "ItemObjectName");
        let catalog_number = cols.get(row, "ItemCatalogNumber");
        if !object_name.is_empty() || !catalog_number.is_empty() {
            txn.items.push(LoanItem {
                catalog_number: catalog_number.to_string(),
                object_name: object_name.to_string(),
                preparation: cols.get(row, "ItemPreparation").to_string(),
                description: cols.get(row, "ItemDescription").to_string(),
                count: parse_count(cols.get(row, "ItemCount")),
                count_outstanding: parse_count(cols.get(row, "ItemCountOutstanding")),
            });
        }
    }
    Ok(transactions)
}

pub fn read_export(file_path: &Path, format_key: Option<&str>) -> Result<BTreeMap<i64, Transaction>> {
    let format = if let Some(key) = format_key {
        get_by_key(key).ok_or_else(|| DunnError::UnknownFormat(key.to_string()))?
    } else {
        get_for_file(file_path)
            .ok_or_else(|| DunnError::UnknownFormat(file_path.to_string_lossy().to_string()))?
    };
    let (headers, rows) = format.parse(file_path)?;
    assemble(&headers, &rows)
}
