use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DunnError, Result};
use crate::fmt::{letter_date, ordinal_word};
use crate::models::{Contact, Level, Transaction};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Template components
// ---------------------------------------------------------------------------

/// Letter text fragments keyed by (level, component). Level lookup falls
/// back to "default"; only the escalation fragment may resolve to nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Components(pub HashMap<String, HashMap<String, String>>);

const DEFAULT_COMPONENTS: &[(&str, &[(&str, &str)])] = &[
    (
        "default",
        &[
            ("greeting", "<p>{greeting}</p>"),
            (
                "intro_due",
                "<p>Our records show that loan {tranum} was due on <b>{due_date}</b> \
                 and that some or all of the borrowed material remains outstanding. \
                 This loan must be renewed or returned.</p>",
            ),
            (
                "intro_reminder",
                "<p>This is a courtesy reminder that loan {tranum} is due on \
                 <b>{due_date}</b>. If you need more time, please contact us to \
                 arrange a renewal before the due date.</p>",
            ),
            (
                "action",
                "<p>Please renew or return the outstanding material by \
                 <b>{return_date}</b>. Correspondence and small returns may be \
                 mailed to:</p>\
                 <blockquote>{coll_mailing_address}</blockquote>\
                 <p>Shipments should be addressed to:</p>\
                 <blockquote>{coll_shipping_address}</blockquote>",
            ),
            (
                "data_return",
                "<p>If specimens were sampled or consumed during analysis, please \
                 include any resulting data, residues, and copies of publications \
                 with your return.</p>",
            ),
            (
                "org_change",
                "who our records indicate is no longer affiliated with {org}",
            ),
        ],
    ),
    (
        "recall",
        &[
            (
                "intro_due",
                "<p>Loan {tranum} has been recalled by {institution}. Please \
                 arrange for the return of all outstanding material regardless \
                 of the original due date.</p>",
            ),
            (
                "intro_reminder",
                "<p>Loan {tranum} has been recalled by {institution}. Please \
                 arrange for the return of all outstanding material regardless \
                 of the original due date.</p>",
            ),
        ],
    ),
    (
        "warn",
        &[(
            "escalate",
            "<p>This is the {nth} notice for this loan. If we receive no \
             response, future notices will be directed to your supervisor.</p>",
        )],
    ),
    (
        "escalate",
        &[(
            "escalate",
            "<p>This is the {nth} notice for this loan. Because earlier notices \
             have gone unanswered, this letter has also been directed to the \
             borrower's supervisor.</p>",
        )],
    ),
    (
        "deceased_contact",
        &[
            (
                "intro_due",
                "<p>We are writing about loan {tranum}, originally made to \
                 {orig_contact}, who we understand has passed away. As the \
                 responsible representative of {org}, we ask for your help \
                 resolving this loan, which was due on <b>{due_date}</b>.</p>",
            ),
            (
                "intro_reminder",
                "<p>We are writing about loan {tranum}, originally made to \
                 {orig_contact}, who we understand has passed away. As the \
                 responsible representative of {org}, we ask for your help with \
                 this loan, which is due on <b>{due_date}</b>.</p>",
            ),
        ],
    ),
    (
        "new_contact",
        &[
            (
                "intro_due",
                "<p>We are writing to you as the current representative for loan \
                 {tranum}, originally made to {orig_contact}{org_change}. The \
                 loan was due on <b>{due_date}</b> and must be renewed or \
                 returned.</p>",
            ),
            (
                "intro_reminder",
                "<p>We are writing to you as the current representative for loan \
                 {tranum}, originally made to {orig_contact}{org_change}. The \
                 loan is due on <b>{due_date}</b>.</p>",
            ),
        ],
    ),
];

impl Default for Components {
    fn default() -> Self {
        let mut levels = HashMap::new();
        for (level, entries) in DEFAULT_COMPONENTS {
            let map: HashMap<String, String> = entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            levels.insert(level.to_string(), map);
        }
        Components(levels)
    }
}

impl Components {
    /// Load curator-edited components, falling back to the built-in set.
    pub fn load_or_default(path: &Path) -> Components {
        if path.exists() {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Components::default()
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{json}\n"))?;
        Ok(())
    }

    fn get(&self, level: &str, key: &str) -> Result<&str> {
        if let Some(text) = self.0.get(level).and_then(|m| m.get(key)) {
            return Ok(text);
        }
        if let Some(text) = self.0.get("default").and_then(|m| m.get(key)) {
            return Ok(text);
        }
        // Only the escalation fragment can legitimately be absent
        if key == "escalate" {
            return Ok("");
        }
        Err(DunnError::Template(format!(
            "no component for {level}/{key}"
        )))
    }
}

/// Replace {name} placeholders from the value map. Unknown placeholders are
/// an error so typos in edited components fail loudly instead of mailing out
/// half-filled letters.
pub fn fill(template: &str, vars: &HashMap<&'static str, String>) -> Result<String> {
    let re = Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex");
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let m = caps.get(0).expect("capture 0");
        let key = &caps[1];
        let value = vars
            .get(key)
            .ok_or_else(|| DunnError::Template(format!("unknown placeholder: {{{key}}}")))?;
        out.push_str(&template[last..m.start()]);
        out.push_str(value);
        last = m.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Letter pieces
// ---------------------------------------------------------------------------

/// Salutation for the letter. Institutional contacts get the generic form.
pub fn greeting(contact: &Contact) -> String {
    if contact.is_person() {
        let title = if contact.title.is_empty() {
            contact.first_name.chars().take(1).collect::<String>()
        } else {
            contact.title.trim_end_matches('.').to_string()
        };
        format!("Dear {}. {}:", title, contact.last_name)
    } else {
        "To whom it may concern:".to_string()
    }
}

/// High-level summary: header, loaned-items sentence, outstanding-item table.
pub fn summarize(txn: &Transaction, institution: &str) -> String {
    let n = txn.items.len();
    let plural = if n == 1 { "" } else { "s" };
    let name = txn
        .orig_contact
        .as_ref()
        .map(|c| c.name())
        .unwrap_or_default();
    let start = txn
        .open_date
        .map(|d| format!(" on {}", letter_date(d)))
        .unwrap_or_default();

    let sentence = if txn.organization.is_empty() {
        format!(
            "<p>{institution} loaned {n} item{plural} to {name}{start}. \
             The following objects are overdue:</p>"
        )
    } else {
        format!(
            "<p>{institution} loaned {n} item{plural} to {} on behalf of \
             {name}{start}. The following objects are overdue:</p>",
            txn.organization
        )
    };

    format!(
        "<h2>Transaction {}</h2>{sentence}{}",
        txn.number,
        item_table(txn)
    )
}

/// Table of outstanding items sorted by object name then catalog number.
pub fn item_table(txn: &Transaction) -> String {
    let mut items: Vec<_> = txn.outstanding_items().collect();
    items.sort_by(|a, b| {
        (a.object_name.as_str(), a.catalog_number.as_str())
            .cmp(&(b.object_name.as_str(), b.catalog_number.as_str()))
    });

    let mut table = String::from(
        "<table>\n<tr><th>Catalog number</th><th>Object</th><th>Type</th>\
         <th>Description</th><th># outstanding</th></tr>\n",
    );
    for item in items {
        table.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}/{}</td></tr>\n",
            item.catalog_number,
            item.object_name,
            item.preparation,
            item.description,
            item.count_outstanding,
            item.count
        ));
    }
    table.push_str("</table>");
    table
}

// ---------------------------------------------------------------------------
// Letter assembly
// ---------------------------------------------------------------------------

const TEMPLATE: &str = "\
<html>
<head>
<style>
body { font-family: Calibri, Arial, sans-serif; font-size: 11pt; }
table { border-collapse: collapse; }
th, td { border: 1px solid #999; padding: 4px 8px; text-align: left; }
.metadata { font-weight: bold; }
</style>
</head>
<body>
{greeting}
{intro}
{summary}
{escalation}
{action}
{data_return}
<p>Sincerely,</p>
<p>{sender}<br>{coll_title}<br>{institution}<br>{coll_email}<br>{coll_phone}</p>
</body>
</html>
";

#[derive(Debug, Clone)]
pub struct Letter {
    pub transaction_number: i64,
    pub level: Level,
    pub subject: String,
    pub to: String,
    pub cc: Vec<String>,
    pub html: String,
}

impl Letter {
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.transaction_number, self.level.key())
    }

    /// Preview variant with a Subject/To/Cc block injected after <body>.
    pub fn preview_html(&self) -> String {
        let mut metadata = vec![
            format!("<span class='metadata'>Subject:</span> {}", self.subject),
            format!("<span class='metadata'>To:</span> {}", self.to),
        ];
        if !self.cc.is_empty() {
            metadata.push(format!(
                "<span class='metadata'>Cc:</span> {}",
                self.cc.join("; ")
            ));
        }
        let block = format!("<body>\n<p>{}</p><hr />", metadata.join("<br>"));
        self.html.replacen("<body>", &block, 1)
    }
}

fn as_html_address(address: &str) -> String {
    address.trim().replace('\n', "<br>")
}

/// Compose the dunning letter for one loan. The caller has already verified
/// eligibility; a supervisor address means the letter is escalated and the
/// to/cc fields flip accordingly.
pub fn compose_letter(
    txn: &Transaction,
    settings: &Settings,
    components: &Components,
    supervisor: Option<&str>,
    today: NaiveDate,
    debug: bool,
) -> Result<Letter> {
    let contact = txn
        .contact
        .as_ref()
        .ok_or_else(|| DunnError::Other(format!("{}: no contact", txn.number)))?;
    let orig_contact = txn.orig_contact.as_ref().unwrap_or(contact);
    let return_date = today + chrono::Duration::days(settings.return_window_days);
    let kind = if txn.level == Level::Recall {
        "Recalled"
    } else {
        "Overdue"
    };

    let mut vars: HashMap<&'static str, String> = HashMap::new();
    vars.insert("tranum", txn.number.to_string());
    vars.insert("greeting", greeting(contact));
    vars.insert("name", contact.name());
    vars.insert("org", txn.organization.clone());
    vars.insert("due_date", txn.due_date.map(letter_date).unwrap_or_default());
    vars.insert("return_date", letter_date(return_date));
    vars.insert("nth", ordinal_word(txn.dunn_count + 1));
    vars.insert("orig_contact", orig_contact.name());
    vars.insert("org_change", String::new());
    vars.insert("kind", kind.to_string());
    vars.insert("institution", settings.institution.clone());
    vars.insert("coll_name", settings.dunner.name.clone());
    vars.insert("coll_title", settings.dunner.title.clone());
    vars.insert("coll_email", settings.dunner.email.clone());
    vars.insert("coll_phone", settings.dunner.phone.clone());
    vars.insert(
        "coll_mailing_address",
        as_html_address(&settings.dunner.mailing_address),
    );
    vars.insert(
        "coll_shipping_address",
        as_html_address(&settings.dunner.shipping_address),
    );

    // Note a change of affiliation when the loan went to an organization the
    // contact is no longer part of
    if !txn.organization.is_empty() && txn.organization != contact.affiliation {
        let clause = fill(components.get("default", "org_change")?, &vars)?;
        vars.insert("org_change", format!(" {clause}"));
    }

    let intro_key = if txn.is_overdue(today) {
        "intro_due"
    } else {
        "intro_reminder"
    };

    // The intro changes when the letter cannot go to the original borrower
    let intro_level = if contact.deceased || orig_contact.deceased {
        "deceased_contact"
    } else if contact.last_name != orig_contact.last_name {
        "new_contact"
    } else {
        match txn.level {
            Level::Recall => "recall",
            Level::Loan => "default",
        }
    };

    let escalation = if txn.dunn_count >= settings.escalate_after {
        fill(components.get("escalate", "escalate")?, &vars)?
    } else if txn.dunn_count >= settings.warn_after {
        fill(components.get("warn", "escalate")?, &vars)?
    } else {
        String::new()
    };

    let level_key = match txn.level {
        Level::Recall => "recall",
        Level::Loan => "default",
    };
    let mut sections: HashMap<&'static str, String> = HashMap::new();
    sections.insert(
        "greeting",
        fill(components.get(level_key, "greeting")?, &vars)?,
    );
    sections.insert("intro", fill(components.get(intro_level, intro_key)?, &vars)?);
    sections.insert("summary", summarize(txn, &settings.institution));
    sections.insert("escalation", escalation);
    sections.insert("action", fill(components.get(level_key, "action")?, &vars)?);
    sections.insert(
        "data_return",
        fill(components.get(level_key, "data_return")?, &vars)?,
    );
    sections.insert("sender", settings.dunner.name.clone());
    sections.insert("institution", settings.institution.clone());
    sections.insert("coll_title", settings.dunner.title.clone());
    sections.insert("coll_email", settings.dunner.email.clone());
    sections.insert("coll_phone", settings.dunner.phone.clone());

    let body = fill(TEMPLATE, &sections)?.trim().to_string();
    let body = postprocess(&body, txn.level);

    let mut subject = format!(
        "{kind} loan from {}: {}",
        settings.institution, txn.number
    );
    if debug {
        subject.push_str(" [DEBUG]");
    }

    // Escalated letters go TO the supervisor with the borrower cc'd
    let (to, cc) = match supervisor {
        Some(supervisor) => (
            supervisor.to_string(),
            vec![contact.email.clone(), settings.dunner.email.clone()],
        ),
        None => (contact.email.clone(), vec![settings.dunner.email.clone()]),
    };

    Ok(Letter {
        transaction_number: txn.number,
        level: txn.level,
        subject,
        to,
        cc,
        html: body,
    })
}

/// Normalize breaks, space out block elements, and adjust recall wording.
fn postprocess(body: &str, level: Level) -> String {
    let body = body.replace("<br />", "<br>");
    let re = Regex::new(r"((?:</(?:blockquote|h\d|li|p|table|ul)>\s*)+)")
        .expect("block close regex");
    let body = re.replace_all(&body, "$1<br>").to_string();
    if level == Level::Recall {
        body.replace("must be renewed or returned", "has been recalled")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanItem;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contact() -> Contact {
        Contact {
            title: "Dr.".into(),
            first_name: "Ada".into(),
            last_name: "Byron".into(),
            email: "ada@example.edu".into(),
            affiliation: "University Museum".into(),
            deceased: false,
        }
    }

    fn txn() -> Transaction {
        Transaction {
            number: 100123,
            irn: 5001,
            catalog: "PAL".into(),
            level: Level::Loan,
            status: "OPEN".into(),
            open_date: Some(date(2024, 1, 10)),
            due_date: Some(date(2025, 1, 10)),
            dunn_count: 0,
            last_interaction: Some(date(2024, 1, 10)),
            contact: Some(contact()),
            orig_contact: Some(contact()),
            organization: "University Museum".into(),
            items: vec![
                LoanItem {
                    catalog_number: "PAL 1002".into(),
                    object_name: "Trilobite".into(),
                    preparation: "Slab".into(),
                    description: "Partial".into(),
                    count: 2,
                    count_outstanding: 2,
                },
                LoanItem {
                    catalog_number: "PAL 1001".into(),
                    object_name: "Ammonite".into(),
                    preparation: "Shell".into(),
                    description: String::new(),
                    count: 1,
                    count_outstanding: 0,
                },
            ],
        }
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.institution = "the National Museum".into();
        s.dunner.name = "Riley Quinn".into();
        s.dunner.email = "rquinn@museum.example".into();
        s.dunner.mailing_address = "Registrar\nPO Box 1".into();
        s.dunner.shipping_address = "Loading Dock\n1 Museum Way".into();
        s
    }

    #[test]
    fn test_greeting() {
        assert_eq!(greeting(&contact()), "Dear Dr. Byron:");

        let mut untitled = contact();
        untitled.title = String::new();
        assert_eq!(greeting(&untitled), "Dear A. Byron:");

        let institution = Contact {
            affiliation: "University Museum".into(),
            ..Contact::default()
        };
        assert_eq!(greeting(&institution), "To whom it may concern:");
    }

    #[test]
    fn test_fill_and_unknown_placeholder() {
        let mut vars = HashMap::new();
        vars.insert("tranum", "100123".to_string());
        assert_eq!(fill("Loan {tranum}.", &vars).unwrap(), "Loan 100123.");
        assert!(fill("Loan {mystery}.", &vars).is_err());
    }

    #[test]
    fn test_item_table_only_outstanding() {
        let table = item_table(&txn());
        assert!(table.contains("Trilobite"));
        assert!(table.contains("2/2"));
        assert!(!table.contains("Ammonite"));
    }

    #[test]
    fn test_item_table_sorted() {
        let mut t = txn();
        for item in &mut t.items {
            item.count_outstanding = 1;
        }
        let table = item_table(&t);
        let ammonite = table.find("Ammonite").unwrap();
        let trilobite = table.find("Trilobite").unwrap();
        assert!(ammonite < trilobite);
    }

    #[test]
    fn test_summarize_without_organization() {
        let mut t = txn();
        t.organization = String::new();
        let summary = summarize(&t, "the National Museum");
        assert!(summary.contains("loaned 2 items to Ada Byron on 10 Jan 2024"));
        assert!(!summary.contains("on behalf of"));
    }

    #[test]
    fn test_compose_overdue_letter() {
        let letter = compose_letter(
            &txn(),
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert_eq!(
            letter.subject,
            "Overdue loan from the National Museum: 100123"
        );
        assert_eq!(letter.to, "ada@example.edu");
        assert_eq!(letter.cc, vec!["rquinn@museum.example".to_string()]);
        assert!(letter.html.contains("Dear Dr. Byron:"));
        assert!(letter.html.contains("must be renewed or returned"));
        assert!(letter.html.contains("Transaction 100123"));
        assert_eq!(letter.file_stem(), "100123_loan");
    }

    #[test]
    fn test_compose_reminder_intro() {
        let mut t = txn();
        t.due_date = Some(date(2026, 3, 20));
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert!(letter.html.contains("courtesy reminder"));
    }

    #[test]
    fn test_compose_recall_substitution() {
        let mut t = txn();
        t.level = Level::Recall;
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert_eq!(
            letter.subject,
            "Recalled loan from the National Museum: 100123"
        );
        assert!(letter.html.contains("has been recalled"));
        assert!(!letter.html.contains("must be renewed or returned"));
    }

    #[test]
    fn test_compose_escalated_routing() {
        let mut t = txn();
        t.dunn_count = 4;
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            Some("chair@example.edu"),
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert_eq!(letter.to, "chair@example.edu");
        assert_eq!(
            letter.cc,
            vec![
                "ada@example.edu".to_string(),
                "rquinn@museum.example".to_string()
            ]
        );
        assert!(letter.html.contains("fifth notice"));
    }

    #[test]
    fn test_compose_warning_below_escalation() {
        let mut t = txn();
        t.dunn_count = 2;
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert!(letter.html.contains("third notice"));
        assert!(letter.html.contains("future notices"));
    }

    #[test]
    fn test_compose_new_contact_intro() {
        let mut t = txn();
        let mut current = contact();
        current.last_name = "Lovelace".into();
        current.first_name = "Annabella".into();
        current.affiliation = "Analytical Society".into();
        t.contact = Some(current);
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert!(letter.html.contains("originally made to Ada Byron"));
        assert!(letter
            .html
            .contains("no longer affiliated with University Museum"));
    }

    #[test]
    fn test_compose_deceased_contact_intro() {
        let mut t = txn();
        t.orig_contact.as_mut().unwrap().deceased = true;
        let letter = compose_letter(
            &t,
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        assert!(letter.html.contains("has passed away"));
    }

    #[test]
    fn test_debug_subject_tag() {
        let letter = compose_letter(
            &txn(),
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            true,
        )
        .unwrap();
        assert!(letter.subject.ends_with(" [DEBUG]"));
    }

    #[test]
    fn test_preview_html_injects_metadata() {
        let letter = compose_letter(
            &txn(),
            &settings(),
            &Components::default(),
            None,
            date(2026, 3, 1),
            false,
        )
        .unwrap();
        let preview = letter.preview_html();
        assert!(preview.contains("Subject:</span> Overdue loan"));
        assert!(preview.contains("To:</span> ada@example.edu"));
        assert!(preview.contains("<hr />"));
    }

    #[test]
    fn test_components_roundtrip_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.json");
        Components::default().save(&path).unwrap();
        let loaded = Components::load_or_default(&path);
        // recall has no greeting of its own; lookup falls back to default
        assert_eq!(
            loaded.get("recall", "greeting").unwrap(),
            "<p>{greeting}</p>"
        );
        // escalate may be absent entirely
        assert_eq!(loaded.get("default", "escalate").unwrap(), "");
        assert!(loaded.get("default", "nonexistent").is_err());
    }
}
