use std::collections::BTreeMap;

use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::preflight;
use crate::settings::load_settings;
use crate::tracking::{self, Group};

pub fn run() -> Result<()> {
    let settings = load_settings();
    let data_dir = settings.data_dir();

    println!("Data dir:    {}", data_dir.display());
    println!("Preflight:   {}", settings.preflight_path().display());
    println!(
        "Dunner:      {} <{}>",
        if settings.dunner.name.is_empty() {
            "(not set)"
        } else {
            &settings.dunner.name
        },
        settings.dunner.email
    );
    println!(
        "Thresholds:  warn after {} dunns, escalate after {}",
        settings.warn_after, settings.escalate_after
    );

    match preflight::load(&settings.preflight_path())? {
        None => {
            println!();
            println!("No preflight table yet. Run `dunn preflight build` first.");
        }
        Some(rows) => {
            let mut by_code: BTreeMap<String, usize> = BTreeMap::new();
            for row in &rows {
                let code = if row.do_not_dunn.is_empty() {
                    "(dunnable)".to_string()
                } else {
                    row.do_not_dunn.clone()
                };
                *by_code.entry(code).or_default() += 1;
            }
            let mut table = Table::new();
            table.set_header(vec!["Status", "Loans"]);
            for (code, count) in &by_code {
                table.add_row(vec![Cell::new(code), Cell::new(count)]);
            }
            println!();
            println!("Preflight ({} rows)\n{table}", rows.len());
        }
    }

    let groups_dir = settings.groups_dir();
    for (label, path) in [
        ("Succeeded", tracking::succeeded_path(&groups_dir, false)),
        ("Failed", tracking::failed_path(&groups_dir, false)),
        ("Succeeded (debug)", tracking::succeeded_path(&groups_dir, true)),
        ("Failed (debug)", tracking::failed_path(&groups_dir, true)),
    ] {
        if !path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<Group>(&content) {
            Ok(group) => println!(
                "{label}: {} transactions (export {})",
                group.irns.len(),
                &group.export_checksum[..group.export_checksum.len().min(12)]
            ),
            Err(_) => println!("{label}: unreadable group file at {}", path.display()),
        }
    }

    Ok(())
}
