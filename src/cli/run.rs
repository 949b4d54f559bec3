use std::collections::BTreeSet;

use colored::Colorize;
use log::{error, info, warn};

use crate::cli::resolve_export_path;
use crate::compose::Components;
use crate::dunning::{DunnRunner, Outcome};
use crate::error::{DunnError, Result};
use crate::export;
use crate::mailer::{CommandMailer, Mailer, OutboxMailer};
use crate::models::Transaction;
use crate::preflight;
use crate::settings::{components_path, load_settings, Settings};
use crate::tracking;

#[allow(clippy::too_many_arguments)]
pub fn run(
    export_file: Option<&str>,
    format: Option<&str>,
    debug_flag: bool,
    transaction: Option<i64>,
    yes: bool,
    no_input: bool,
    no_review: bool,
) -> Result<()> {
    let settings = load_settings();
    let debug = debug_flag || settings.debug;
    let today = chrono::Local::now().date_naive();

    std::fs::create_dir_all(settings.letters_dir())?;
    std::fs::create_dir_all(settings.groups_dir())?;

    info!("===================");
    info!("Running dunning batch (debug: {debug})");

    let export_path = resolve_export_path(&settings, export_file);
    let checksum = export::compute_checksum(&export_path)?;
    let transactions = export::read_export(&export_path, format)?;
    info!(
        "Read {} transactions from {}",
        transactions.len(),
        export_path.display()
    );

    // Drop closed transactions and their metadata from the saved preflight
    if settings.remove_closed_transactions {
        let active: BTreeSet<i64> = transactions.keys().copied().collect();
        let removed = preflight::remove_closed(&settings.preflight_path(), &active, !no_input)?;
        if removed > 0 {
            println!("Removed {removed} closed transactions from preflight");
        }
    }

    // Transactions already handled since this export was generated
    let succeeded_path = tracking::succeeded_path(&settings.groups_dir(), debug);
    let failed_path = tracking::failed_path(&settings.groups_dir(), debug);
    let mut dunned = tracking::load_irns(&succeeded_path, &checksum)?;
    let mut skipped = tracking::load_irns(&failed_path, &checksum)?;
    let handled: BTreeSet<i64> = dunned.iter().chain(skipped.iter()).copied().collect();

    // Regenerate the preflight table and reconcile it with the saved one
    let new_rows = preflight::build_rows(&transactions, &settings, today)?;
    let preflight_path = settings.preflight_path();
    let rows = match preflight::load(&preflight_path)? {
        None => {
            preflight::save(&new_rows, &preflight_path, !no_input)?;
            println!(
                "Created {}. Review it and re-run to send dunns.",
                preflight_path.display()
            );
            return Ok(());
        }
        Some(old_rows) => {
            let outcome = preflight::merge(&new_rows, &old_rows, today, settings.recent_days);
            if outcome.diff.is_empty() {
                outcome.rows
            } else {
                println!("Found differences! Updating preflight file...");
                outcome.diff.print();
                preflight::save(&outcome.rows, &preflight_path, !no_input)?;
                if !no_review {
                    println!(
                        "Updated {}. Review it and re-run to send dunns.",
                        preflight_path.display()
                    );
                    return Ok(());
                }
                outcome.rows
            }
        }
    };

    if !debug && !confirm_batch(yes, no_input, &settings) {
        return Err(DunnError::Other("user chose not to proceed".to_string()));
    }

    let mut mailer = build_mailer(&settings, debug);
    let components = Components::load_or_default(&components_path());
    let mut runner = DunnRunner::new(&settings, &components, today, !debug, yes, no_input);

    let mut loans: Vec<&Transaction> = transactions
        .values()
        .filter(|t| t.is_open() && t.contact.is_some())
        .collect();
    loans.sort_by_key(|t| t.contact_name());

    let letters_dir = settings.letters_dir();
    let only = transaction.or(settings.debug_transaction);
    for txn in loans {
        if let Some(number) = only {
            if txn.number != number {
                continue;
            }
        }
        if handled.contains(&txn.irn) {
            let msg = format!("{}: Dunn already processed", txn.number);
            info!("{msg}");
            println!("{msg}");
            continue;
        }
        if !txn.is_overdue(today) && !txn.is_almost_due(today, settings.almost_due_days) {
            continue;
        }
        match runner.dunn(txn, &rows, &letters_dir, mailer.as_mut()) {
            Ok(Outcome::Sent) => {
                let msg = format!("{}: Dunn succeeded", txn.number);
                info!("{msg}");
                println!("{}", msg.green());
                dunned.push(txn.irn);
            }
            Ok(Outcome::Previewed) => {
                let msg = format!("{}: Dunn previewed", txn.number);
                info!("{msg}");
                println!("{}", msg.green());
                dunned.push(txn.irn);
            }
            Ok(Outcome::Blocked(reason)) => {
                let msg = format!("{}: Dunn failed ({reason})", txn.number);
                warn!("{msg}");
                println!("{}", msg.red());
                skipped.push(txn.irn);
            }
            // Mail failures are per-loan; keep going with the rest
            Err(err) => {
                let msg = format!("{}: Dunn failed ({err})", txn.number);
                error!("{msg}");
                println!("{}", msg.red());
                skipped.push(txn.irn);
            }
        }
    }
    println!("Done!");

    if !dunned.is_empty() {
        tracking::save(&succeeded_path, tracking::GROUP_SUCCEEDED, &checksum, &dunned)?;
    }
    if !skipped.is_empty() {
        tracking::save(&failed_path, tracking::GROUP_FAILED, &checksum, &skipped)?;
    }
    preflight::save(&rows, &preflight_path, !no_input)?;
    Ok(())
}

/// Real sends need an explicit go-ahead; a disabled safe-send gets a second
/// one. `--yes` stands in for both prompts.
fn confirm_batch(yes: bool, no_input: bool, settings: &Settings) -> bool {
    if yes {
        return true;
    }
    if no_input {
        return false;
    }
    let proceed = dialoguer::Confirm::new()
        .with_prompt(
            "***This will send out actual dunning emails to actual people! \
             Are you sure you want to continue?***",
        )
        .default(false)
        .interact()
        .unwrap_or(false);
    if !proceed {
        return false;
    }
    if !settings.safe_send {
        return dialoguer::Confirm::new()
            .with_prompt(
                "***You have disabled the safe send option! This is your last \
                 chance to bail before sending a dunning letter to everyone \
                 with an overdue loan. Are you sure you want to continue?***",
            )
            .default(false)
            .interact()
            .unwrap_or(false);
    }
    true
}

fn build_mailer(settings: &Settings, debug: bool) -> Box<dyn Mailer> {
    let outbox = settings.outbox_dir();
    match (&settings.mail_command, debug) {
        (Some(command), false) => Box::new(CommandMailer::new(command.clone(), outbox)),
        _ => Box::new(OutboxMailer::new(outbox)),
    }
}
