use chrono::NaiveDate;

/// Loan level from the museum records system. A recall demands return
/// regardless of the due date; an ordinary loan is dunned when overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Loan,
    Recall,
}

impl Level {
    pub fn parse(raw: &str) -> Level {
        if raw.trim().eq_ignore_ascii_case("recall") {
            Level::Recall
        } else {
            Level::Loan
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Level::Loan => "loan",
            Level::Recall => "recall",
        }
    }

    /// Title-case form used in the preflight Level column.
    pub fn title(&self) -> &'static str {
        match self {
            Level::Loan => "Loan",
            Level::Recall => "Recall",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub affiliation: String,
    pub deceased: bool,
}

impl Contact {
    /// A contact with a last name is a person; otherwise it is an
    /// institutional contact addressed through its affiliation.
    pub fn is_person(&self) -> bool {
        !self.last_name.is_empty()
    }

    pub fn name(&self) -> String {
        if self.is_person() {
            format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string()
        } else {
            self.affiliation.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoanItem {
    pub catalog_number: String,
    pub object_name: String,
    pub preparation: String,
    pub description: String,
    pub count: u32,
    pub count_outstanding: u32,
}

impl LoanItem {
    pub fn is_outstanding(&self) -> bool {
        self.count_outstanding > 0
    }
}

/// An outgoing loan assembled from one or more export rows.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub number: i64,
    pub irn: i64,
    pub catalog: String,
    pub level: Level,
    pub status: String,
    pub open_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub dunn_count: u32,
    pub last_interaction: Option<NaiveDate>,
    pub contact: Option<Contact>,
    pub orig_contact: Option<Contact>,
    pub organization: String,
    pub items: Vec<LoanItem>,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.status.eq_ignore_ascii_case("open")
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        match self.due_date {
            Some(due) => due < today,
            None => false,
        }
    }

    /// Due within the almost-due window. Overdue loans are not "almost due".
    pub fn is_almost_due(&self, today: NaiveDate, window_days: i64) -> bool {
        match self.due_date {
            Some(due) => due >= today && (due - today).num_days() <= window_days,
            None => false,
        }
    }

    pub fn outstanding_items(&self) -> impl Iterator<Item = &LoanItem> {
        self.items.iter().filter(|i| i.is_outstanding())
    }

    pub fn contact_name(&self) -> String {
        self.contact.as_ref().map(|c| c.name()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("recall"), Level::Recall);
        assert_eq!(Level::parse("RECALL"), Level::Recall);
        assert_eq!(Level::parse("loan"), Level::Loan);
        assert_eq!(Level::parse(""), Level::Loan);
        assert_eq!(Level::Recall.title(), "Recall");
    }

    #[test]
    fn test_contact_name() {
        let person = Contact {
            first_name: "Ada".into(),
            last_name: "Byron".into(),
            ..Contact::default()
        };
        assert!(person.is_person());
        assert_eq!(person.name(), "Ada Byron");

        let institution = Contact {
            affiliation: "University Museum".into(),
            ..Contact::default()
        };
        assert!(!institution.is_person());
        assert_eq!(institution.name(), "University Museum");
    }

    #[test]
    fn test_overdue_and_almost_due() {
        let today = date(2026, 3, 1);
        let mut txn = Transaction {
            due_date: Some(date(2026, 2, 1)),
            ..Transaction::default()
        };
        assert!(txn.is_overdue(today));
        assert!(!txn.is_almost_due(today, 30));

        txn.due_date = Some(date(2026, 3, 20));
        assert!(!txn.is_overdue(today));
        assert!(txn.is_almost_due(today, 30));

        txn.due_date = Some(date(2026, 5, 1));
        assert!(!txn.is_almost_due(today, 30));

        txn.due_date = None;
        assert!(!txn.is_overdue(today));
        assert!(!txn.is_almost_due(today, 30));
    }

    #[test]
    fn test_outstanding_items() {
        let txn = Transaction {
            items: vec![
                LoanItem {
                    count: 4,
                    count_outstanding: 2,
                    ..LoanItem::default()
                },
                LoanItem {
                    count: 1,
                    count_outstanding: 0,
                    ..LoanItem::default()
                },
            ],
            ..Transaction::default()
        };
        assert_eq!(txn.outstanding_items().count(), 1);
    }
}
