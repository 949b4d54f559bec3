use chrono::NaiveDate;

/// Format a date the way it appears in letters: 05 Mar 2026.
pub fn letter_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

const ORDINAL_WORDS: &[&str] = &[
    "zeroth",
    "first",
    "second",
    "third",
    "fourth",
    "fifth",
    "sixth",
    "seventh",
    "eighth",
    "ninth",
    "tenth",
    "eleventh",
    "twelfth",
];

/// Spell out a small ordinal ("second"); fall back to 13th, 21st, etc.
pub fn ordinal_word(n: u32) -> String {
    if let Some(word) = ORDINAL_WORDS.get(n as usize) {
        return (*word).to_string();
    }
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_date() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(letter_date(d), "05 Mar 2026");
    }

    #[test]
    fn test_ordinal_word_spelled() {
        assert_eq!(ordinal_word(1), "first");
        assert_eq!(ordinal_word(3), "third");
        assert_eq!(ordinal_word(12), "twelfth");
    }

    #[test]
    fn test_ordinal_word_numeric_fallback() {
        assert_eq!(ordinal_word(13), "13th");
        assert_eq!(ordinal_word(21), "21st");
        assert_eq!(ordinal_word(22), "22nd");
        assert_eq!(ordinal_word(111), "111th");
    }
}
