use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use log::warn;
use regex::Regex;

use crate::compose::{self, Components, Letter};
use crate::error::Result;
use crate::mailer::{Mailer, OutgoingMail};
use crate::models::Transaction;
use crate::preflight::PreflightRow;
use crate::settings::Settings;

/// Validation problems that block a loan from being dunned. Mirrors what a
/// registrar would check before putting a letter in the mail.
pub fn find_errors(txn: &Transaction) -> Vec<String> {
    let mut errors = Vec::new();
    let number = txn.number;

    match &txn.contact {
        None => errors.push(format!("{number}: No contact provided")),
        Some(contact) => {
            if contact.deceased {
                errors.push(format!("{number}: Contact is deceased"));
                return errors;
            }
            if contact.email.is_empty() {
                errors.push(format!("{number}: No email address"));
            } else if !is_plausible_email(&contact.email) {
                errors.push(format!("{number}: Bad email address"));
            } else if contact.is_person() && contact.title.is_empty() && contact.first_name.is_empty()
            {
                errors.push(format!("{number}: No title or first name"));
            }
        }
    }

    if txn.due_date.is_none() {
        errors.push(format!("{number}: No due date"));
    }
    if txn.open_date.is_none() {
        errors.push(format!("{number}: No open date"));
    }
    if txn.outstanding_items().next().is_none() {
        errors.push(format!("{number}: No outstanding items"));
    }

    errors
}

fn is_plausible_email(email: &str) -> bool {
    let re = Regex::new(r"^[^@\s]+@[^@\s]+$").expect("email regex");
    re.is_match(email)
}

/// What happened to one loan during a dunning pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Letter composed and handed to the mail client.
    Sent,
    /// Letter composed and previewed only (debug / no-send run).
    Previewed,
    /// Loan failed its checks; the reason lands in the failed group.
    Blocked(String),
}

/// Drives the per-loan dunning flow: eligibility, supervisor escalation,
/// composition, preview, dispatch.
pub struct DunnRunner<'a> {
    pub settings: &'a Settings,
    pub components: &'a Components,
    pub today: NaiveDate,
    /// False for debug runs; letters are previewed but nothing is dispatched.
    pub send: bool,
    /// Skip all interactive prompts (per-message confirms, supervisor input).
    pub assume_yes: bool,
    pub no_input: bool,
    supervisors: HashMap<String, String>,
}

impl<'a> DunnRunner<'a> {
    pub fn new(
        settings: &'a Settings,
        components: &'a Components,
        today: NaiveDate,
        send: bool,
        assume_yes: bool,
        no_input: bool,
    ) -> Self {
        Self {
            settings,
            components,
            today,
            send,
            assume_yes,
            no_input,
            supervisors: HashMap::new(),
        }
    }

    fn escalate(&self, txn: &Transaction) -> bool {
        txn.dunn_count >= self.settings.escalate_after
    }

    /// Supervisor address for an escalated loan: the preflight column first,
    /// then the per-run cache, then the operator.
    fn supervisor_for(&mut self, txn: &Transaction, row: &PreflightRow) -> Option<String> {
        if !row.supervisor_email.is_empty() {
            return Some(row.supervisor_email.clone());
        }
        let key = format!("{} ({})", txn.contact_name(), txn.organization);
        if let Some(cached) = self.supervisors.get(&key) {
            return Some(cached.clone());
        }
        if self.no_input {
            return None;
        }
        println!(
            "This is dunning letter number {} for {}!",
            txn.dunn_count + 1,
            txn.number
        );
        let supervisor: String = dialoguer::Input::new()
            .with_prompt(format!("Escalation contact for {key}"))
            .allow_empty(true)
            .interact_text()
            .unwrap_or_default();
        if supervisor.is_empty() {
            return None;
        }
        self.supervisors.insert(key, supervisor.clone());
        Some(supervisor)
    }

    fn confirm_send(&self, mail: &OutgoingMail) -> bool {
        if self.assume_yes {
            return true;
        }
        let mut prompt = format!("Send dunning email to {}", mail.to);
        if !mail.cc.is_empty() {
            prompt.push_str(&format!(" (cc: {})", mail.cc.join("; ")));
        }
        prompt.push('?');
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .unwrap_or(false)
    }

    /// Dunn one loan. The caller has already filtered for open loans with a
    /// contact that are overdue or almost due.
    pub fn dunn(
        &mut self,
        txn: &Transaction,
        preflight: &[PreflightRow],
        letters_dir: &Path,
        mailer: &mut dyn Mailer,
    ) -> Result<Outcome> {
        let Some(row) = preflight
            .iter()
            .find(|r| r.transaction_number == txn.number)
        else {
            warn!("{}: Not found in preflight", txn.number);
            return Ok(Outcome::Blocked("not found in preflight".to_string()));
        };

        if !row.do_not_dunn.is_empty() {
            warn!("{}: Do not dunn ({})", txn.number, row.do_not_dunn);
            return Ok(Outcome::Blocked(format!("do not dunn: {}", row.do_not_dunn)));
        }

        let errors = find_errors(txn);
        if !errors.is_empty() {
            warn!("{}", errors.join("\n"));
            return Ok(Outcome::Blocked(errors.join("; ")));
        }

        let supervisor = if self.escalate(txn) {
            match self.supervisor_for(txn, row) {
                Some(supervisor) => Some(supervisor),
                None => {
                    warn!("{}: Escalation required but no supervisor on file", txn.number);
                    return Ok(Outcome::Blocked(
                        "escalation required but no supervisor on file".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let letter = compose::compose_letter(
            txn,
            self.settings,
            self.components,
            supervisor.as_deref(),
            self.today,
            !self.send,
        )?;
        self.write_preview(&letter, letters_dir)?;

        if !self.send {
            return Ok(Outcome::Previewed);
        }

        let mail = self.to_mail(&letter);
        if self.settings.safe_send && !self.confirm_send(&mail) {
            return Ok(Outcome::Blocked("send declined by operator".to_string()));
        }
        mailer.send(&mail)?;
        Ok(Outcome::Sent)
    }

    fn write_preview(&self, letter: &Letter, letters_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(letters_dir)?;
        let path = letters_dir.join(format!("{}.htm", letter.file_stem()));
        std::fs::write(path, letter.preview_html())?;
        Ok(())
    }

    fn to_mail(&self, letter: &Letter) -> OutgoingMail {
        // send_to_me reroutes everything to the dunner's own inbox
        let (to, cc) = if self.settings.send_to_me {
            (self.settings.dunner.email.clone(), Vec::new())
        } else {
            (letter.to.clone(), letter.cc.clone())
        };
        OutgoingMail {
            file_stem: letter.file_stem(),
            to,
            cc,
            subject: letter.subject.clone(),
            html_body: letter.html.clone(),
        }
    }
}
