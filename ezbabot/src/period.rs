//! Period filters and aggregations over an in-memory list of transactions.
//!
//! Everything here is pure: callers read the ledger once per message and
//! compute all totals locally. Numbers reported to users never come from
//! the language model.

use std::{collections::HashMap, str::FromStr};

use chrono::{Datelike, Duration, NaiveDate};
use thiserror::Error;

use crate::model::{Direction, Transaction};

/// Length of the rolling "this week" window, today included
pub const WEEK_WINDOW_DAYS: i64 = 7;

/// Number of transactions shown by "last transactions" when not specified
pub const DEFAULT_DETAILS_LIMIT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    /// Rolling window of `WEEK_WINDOW_DAYS` days ending today
    ThisWeek,
    /// Calendar month containing today
    ThisMonth,
    /// Calendar month before the one containing today
    LastMonth,
    All,
    /// One explicit calendar day
    Day(NaiveDate),
    /// One explicit calendar month
    Month { year: i32, month: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown period `{0}`")]
pub struct PeriodParseError(pub String);

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let period = match normalized.as_str() {
            "today" | "day" | "اليوم" => Period::Today,
            "week" | "this_week" | "الأسبوع" => Period::ThisWeek,
            "month" | "this_month" | "الشهر" => Period::ThisMonth,
            "last_month" | "previous_month" => Period::LastMonth,
            "all" | "" | "الكل" => Period::All,
            other => {
                if let Ok(day) = NaiveDate::parse_from_str(other, "%Y-%m-%d") {
                    Period::Day(day)
                } else if let Ok(first) =
                    NaiveDate::parse_from_str(&format!("{}-01", other), "%Y-%m-%d")
                {
                    Period::Month {
                        year: first.year(),
                        month: first.month(),
                    }
                } else {
                    return Err(PeriodParseError(s.to_string()));
                }
            }
        };
        Ok(period)
    }
}

/// (year, month) of the calendar month before the given one
fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

impl Period {
    /// Whether a transaction dated `date` falls into this period
    pub fn contains(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match *self {
            Period::Today => date == today,
            Period::ThisWeek => {
                let start = today - Duration::days(WEEK_WINDOW_DAYS - 1);
                date >= start && date <= today
            }
            Period::ThisMonth => date.year() == today.year() && date.month() == today.month(),
            Period::LastMonth => {
                let (year, month) = previous_month(today.year(), today.month());
                date.year() == year && date.month() == month
            }
            Period::All => true,
            Period::Day(day) => date == day,
            Period::Month { year, month } => date.year() == year && date.month() == month,
        }
    }

    /// Arabic label used in replies
    pub fn label(&self) -> String {
        match self {
            Period::Today => "اليوم".to_string(),
            Period::ThisWeek => "هذا الأسبوع".to_string(),
            Period::ThisMonth => "هذا الشهر".to_string(),
            Period::LastMonth => "الشهر الماضي".to_string(),
            Period::All => "لكل الفترة المسجلة".to_string(),
            Period::Day(day) => format!("يوم {}", day.format("%Y-%m-%d")),
            Period::Month { year, month } => format!("شهر {:04}-{:02}", year, month),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub income: f64,
    pub expense: f64,
    pub net: f64,
}

/// Transactions falling into `period`, in ledger order
pub fn filter_by_period<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    period: &Period,
    today: NaiveDate,
) -> Vec<&'a Transaction> {
    transactions
        .into_iter()
        .filter(|tx| period.contains(tx.date(), today))
        .collect()
}

/// Case-insensitive substring match on item or category
pub fn matches_filter(transaction: &Transaction, filter: &str) -> bool {
    let needle = filter.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    transaction.description.to_lowercase().contains(&needle)
        || transaction.category.to_lowercase().contains(&needle)
}

pub fn filter_by_text<'a>(transactions: Vec<&'a Transaction>, filter: &str) -> Vec<&'a Transaction> {
    transactions
        .into_iter()
        .filter(|tx| matches_filter(tx, filter))
        .collect()
}

pub fn filter_by_direction<'a>(
    transactions: Vec<&'a Transaction>,
    direction: Direction,
) -> Vec<&'a Transaction> {
    transactions
        .into_iter()
        .filter(|tx| tx.direction == direction)
        .collect()
}

pub fn compute_totals<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Totals {
    let mut totals = Totals::default();
    for tx in transactions {
        match tx.direction {
            Direction::Income => totals.income += tx.amount,
            Direction::Expense => totals.expense += tx.amount,
        }
    }
    totals.net = totals.income - totals.expense;
    totals
}

/// Summed amount per category, largest first (ties by name)
pub fn breakdown_by_category<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Vec<(String, f64)> {
    let mut sums: HashMap<String, f64> = HashMap::new();
    for tx in transactions {
        *sums.entry(tx.category_or_item().to_string()).or_default() += tx.amount;
    }
    let mut result: Vec<(String, f64)> = sums.into_iter().collect();
    result.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    result
}

/// Newest `n` transactions; equal timestamps keep the later write first
pub fn top_n<'a>(transactions: &[&'a Transaction], n: usize) -> Vec<&'a Transaction> {
    let mut indexed: Vec<(usize, &'a Transaction)> =
        transactions.iter().copied().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
    indexed.into_iter().take(n).map(|(_, tx)| tx).collect()
}

/// Display rule for money: whole numbers without decimals, otherwise
/// rounded to two decimal places with trailing zeros dropped.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(date: NaiveDate, direction: Direction, item: &str, amount: f64) -> Transaction {
        Transaction {
            timestamp: date.and_hms_opt(10, 0, 0).unwrap(),
            direction,
            description: item.to_string(),
            category: String::new(),
            amount,
            recorded_by: "Khaled".to_string(),
            notes: None,
            quantity: None,
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(12.0), "12");
        assert_eq!(format_amount(12.5), "12.5");
        assert_eq!(format_amount(12.345), "12.35");
        assert_eq!(format_amount(0.1 + 0.2), "0.3");
        assert_eq!(format_amount(-150.0), "-150");
        assert_eq!(format_amount(4699.0), "4699");
        assert_eq!(format_amount(-0.0), "0");
    }

    #[test]
    fn test_format_amount_is_idempotent() {
        for value in [12.0, 12.5, 3.14159, 1500.25, 0.005, 99.999] {
            let once = format_amount(value);
            let twice = format_amount(once.parse::<f64>().unwrap());
            assert_eq!(once, twice, "value {}", value);
        }
    }

    #[test]
    fn test_period_filter_reference_dates() {
        let today = day(2024, 3, 15);
        let same_day = day(2024, 3, 15);
        let earlier = day(2024, 2, 1);

        for period in [Period::Today, Period::ThisWeek, Period::ThisMonth, Period::All] {
            assert!(period.contains(same_day, today), "{:?}", period);
        }
        assert!(!Period::Today.contains(earlier, today));
        assert!(!Period::ThisMonth.contains(earlier, today));
        assert!(Period::All.contains(earlier, today));
        assert!(Period::LastMonth.contains(earlier, today));
    }

    #[test]
    fn test_week_is_rolling_seven_days() {
        let today = day(2024, 3, 15);
        assert!(Period::ThisWeek.contains(day(2024, 3, 9), today));
        assert!(!Period::ThisWeek.contains(day(2024, 3, 8), today));
        assert!(!Period::ThisWeek.contains(day(2024, 3, 16), today));
    }

    #[test]
    fn test_last_month_wraps_year() {
        let today = day(2024, 1, 10);
        assert!(Period::LastMonth.contains(day(2023, 12, 31), today));
        assert!(!Period::LastMonth.contains(day(2024, 1, 1), today));
    }

    #[test]
    fn test_period_from_str() {
        assert_eq!("today".parse::<Period>(), Ok(Period::Today));
        assert_eq!("week".parse::<Period>(), Ok(Period::ThisWeek));
        assert_eq!("month".parse::<Period>(), Ok(Period::ThisMonth));
        assert_eq!("last_month".parse::<Period>(), Ok(Period::LastMonth));
        assert_eq!("all".parse::<Period>(), Ok(Period::All));
        assert_eq!(
            "2024-03-05".parse::<Period>(),
            Ok(Period::Day(day(2024, 3, 5)))
        );
        assert_eq!(
            "2024-02".parse::<Period>(),
            Ok(Period::Month {
                year: 2024,
                month: 2
            })
        );
        assert!("fortnight".parse::<Period>().is_err());
    }

    #[test]
    fn test_totals_invariant() {
        let today = day(2024, 3, 15);
        let ledger = vec![
            tx(today, Direction::Income, "بيض", 200.0),
            tx(today, Direction::Expense, "أعلاف", 50.0),
            tx(today, Direction::Income, "غنم", 4699.5),
        ];
        let totals = compute_totals(&ledger);
        assert_eq!(totals.income, 4899.5);
        assert_eq!(totals.expense, 50.0);
        assert_eq!(totals.net, totals.income - totals.expense);
        assert_eq!(compute_totals(Vec::<&Transaction>::new()), Totals::default());
    }

    #[test]
    fn test_breakdown_sorted_descending() {
        let today = day(2024, 3, 15);
        let mut feed = tx(today, Direction::Expense, "علف", 300.0);
        feed.category = "أعلاف".to_string();
        let mut feed2 = tx(today, Direction::Expense, "شعير", 500.0);
        feed2.category = "أعلاف".to_string();
        let bill = tx(today, Direction::Expense, "فاتورة كهرباء", 350.0);

        let ledger = vec![feed, bill, feed2];
        let breakdown = breakdown_by_category(&ledger);
        assert_eq!(
            breakdown,
            vec![
                ("أعلاف".to_string(), 800.0),
                ("فاتورة كهرباء".to_string(), 350.0)
            ]
        );
    }

    #[test]
    fn test_top_n_newest_first() {
        let ledger = vec![
            tx(day(2024, 3, 1), Direction::Income, "a", 1.0),
            tx(day(2024, 3, 3), Direction::Income, "b", 2.0),
            tx(day(2024, 3, 2), Direction::Income, "c", 3.0),
            tx(day(2024, 3, 3), Direction::Income, "d", 4.0),
        ];
        let refs: Vec<&Transaction> = ledger.iter().collect();
        let top: Vec<&str> = top_n(&refs, 3)
            .into_iter()
            .map(|t| t.description.as_str())
            .collect();
        assert_eq!(top, vec!["d", "b", "c"]);
    }

    #[test]
    fn test_text_filter_matches_item_or_category() {
        let today = day(2024, 3, 15);
        let mut eggs = tx(today, Direction::Income, "كرتون بيض", 40.0);
        eggs.category = "بيع البيض".to_string();
        let feed = tx(today, Direction::Expense, "أعلاف", 80.0);
        let ledger = vec![eggs, feed];
        let filtered = filter_by_text(ledger.iter().collect(), "بيض");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].description, "كرتون بيض");
    }
}
