/// Gear ratio tables
///
/// Each table row is a standard thread pitch or feed rate: the text shown on
/// the panel, the indicator flags for that mode and the exact number of
/// stepper microsteps per encoder count. Rows are declared as label text
/// and the ratio is derived from the machine geometry, so the same
/// arithmetic serves both the standard rows and values typed on the panel.

use anyhow::{anyhow, Result};
use bitflags::bitflags;
use std::fmt;

use crate::decimal::{parse_decimal, Decimal};

bitflags! {
    /// Mode indicators carried by a table row.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Indicators: u16 {
        const TPI     = 1;
        const INCH    = 1 << 1;
        const MM      = 1 << 2;
        const THREAD  = 1 << 3;
        const FEED    = 1 << 4;
    }
}

/// Exact microsteps-per-encoder-count ratio. Always reduced, denominator > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    numerator: u64,
    denominator: u64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Ratio {
    /// Returns None for a zero denominator.
    pub fn new(numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let g = gcd(numerator, denominator).max(1);
        Some(Self {
            numerator: numerator / g,
            denominator: denominator / g,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// `round(count * ratio)`, rounding half away from zero.
    pub fn scale(&self, count: u64) -> u128 {
        let n = count as u128 * self.numerator as u128;
        let d = self.denominator as u128;
        (n + d / 2) / d
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Which of the four tables: units system and thread-vs-feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKind {
    pub metric: bool,
    pub thread: bool,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind { metric: false, thread: false },
        TableKind { metric: false, thread: true },
        TableKind { metric: true, thread: false },
        TableKind { metric: true, thread: true },
    ];

    pub fn indicators(&self) -> Indicators {
        match (self.metric, self.thread) {
            (false, true) => Indicators::THREAD | Indicators::TPI,
            (false, false) => Indicators::FEED | Indicators::INCH,
            (true, true) => Indicators::THREAD | Indicators::MM,
            (true, false) => Indicators::FEED | Indicators::MM,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = if self.metric { "metric" } else { "imperial" };
        let mode = if self.thread { "thread" } else { "feed" };
        write!(f, "{}-{}", units, mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leadscrew {
    /// Threads per inch.
    Tpi(u32),
    /// Pitch in hundredths of a millimetre.
    HundredthsMm(u32),
}

/// Constants folded into every ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineGeometry {
    /// Encoder counts per spindle revolution.
    pub encoder_resolution: u32,
    /// Full steps per stepper revolution.
    pub stepper_resolution: u32,
    pub microsteps: u32,
    pub leadscrew: Leadscrew,
}

impl MachineGeometry {
    fn microsteps_per_rev(&self) -> u64 {
        self.stepper_resolution as u64 * self.microsteps as u64
    }

    /// Exact ratio for a value expressed in the units of `kind`:
    /// TPI for imperial threads, inches/rev for imperial feeds, mm for
    /// metric threads and feeds. None for zero values or on overflow.
    pub fn ratio_for(&self, kind: TableKind, value: Decimal) -> Option<Ratio> {
        if value.is_zero() || self.encoder_resolution == 0 {
            return None;
        }
        let m = value.mantissa;
        let pow = value.denominator()?;
        let s = self.microsteps_per_rev();
        let enc = self.encoder_resolution as u64;

        let (num, den) = match (kind.metric, kind.thread, self.leadscrew) {
            // leadscrew turns per inch divided by the thread's TPI
            (false, true, Leadscrew::Tpi(l)) => (
                mul(&[s, l as u64, pow])?,
                mul(&[m, enc])?,
            ),
            (false, true, Leadscrew::HundredthsMm(h)) => (
                mul(&[s, 2540, pow])?,
                mul(&[m, enc, h as u64])?,
            ),
            (false, false, Leadscrew::Tpi(l)) => (
                mul(&[m, l as u64, s])?,
                mul(&[enc, pow])?,
            ),
            (false, false, Leadscrew::HundredthsMm(h)) => (
                mul(&[m, 2540, s])?,
                mul(&[enc, pow, h as u64])?,
            ),
            (true, _, Leadscrew::Tpi(l)) => (
                mul(&[m, 10, l as u64, s])?,
                mul(&[enc, pow, 254])?,
            ),
            (true, _, Leadscrew::HundredthsMm(h)) => (
                mul(&[m, 100, s])?,
                mul(&[enc, pow, h as u64])?,
            ),
        };
        Ratio::new(num, den)
    }
}

fn mul(factors: &[u64]) -> Option<u64> {
    factors.iter().try_fold(1u64, |acc, f| acc.checked_mul(*f))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioEntry {
    pub label: String,
    pub indicators: Indicators,
    pub value: Decimal,
    pub ratio: Ratio,
}

impl RatioEntry {
    /// Build a row from its label text, e.g. "11.5" in the imperial thread table.
    pub fn from_label(geometry: &MachineGeometry, kind: TableKind, label: &str) -> Result<Self> {
        let value = parse_decimal(label)
            .ok_or_else(|| anyhow!("'{}' is not a decimal value for the {} table", label, kind))?;
        let ratio = geometry
            .ratio_for(kind, value)
            .ok_or_else(|| anyhow!("'{}' has no usable ratio for the {} table", label, kind))?;
        Ok(Self {
            label: label.to_string(),
            indicators: kind.indicators(),
            value,
            ratio,
        })
    }

    pub fn numerator(&self) -> u64 {
        self.ratio.numerator()
    }

    pub fn denominator(&self) -> u64 {
        self.ratio.denominator()
    }
}

/// Ordered rows with a selection cursor that saturates at both ends.
#[derive(Debug, Clone)]
pub struct RatioTable {
    kind: TableKind,
    entries: Vec<RatioEntry>,
    selected: usize,
    default_index: usize,
}

impl RatioTable {
    pub fn new(kind: TableKind, entries: Vec<RatioEntry>, default_index: usize) -> Result<Self> {
        if entries.is_empty() {
            return Err(anyhow!("{} table has no rows", kind));
        }
        if default_index >= entries.len() {
            return Err(anyhow!(
                "{} table default row {} is out of range ({} rows)",
                kind, default_index, entries.len()
            ));
        }
        Ok(Self {
            kind,
            entries,
            selected: default_index,
            default_index,
        })
    }

    pub fn from_labels(
        geometry: &MachineGeometry,
        kind: TableKind,
        labels: &[&str],
        default_index: usize,
    ) -> Result<Self> {
        let entries = labels
            .iter()
            .map(|label| RatioEntry::from_label(geometry, kind, label))
            .collect::<Result<Vec<_>>>()?;
        Self::new(kind, entries, default_index)
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn entries(&self) -> &[RatioEntry] {
        &self.entries
    }

    pub fn current(&self) -> &RatioEntry {
        &self.entries[self.selected]
    }

    pub fn default_entry(&self) -> &RatioEntry {
        &self.entries[self.default_index]
    }

    pub fn advance(&mut self) -> &RatioEntry {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
        self.current()
    }

    pub fn retreat(&mut self) -> &RatioEntry {
        if self.selected > 0 {
            self.selected -= 1;
        }
        self.current()
    }

    pub fn reset(&mut self) {
        self.selected = self.default_index;
    }

    /// Move the cursor onto the row with this value, if there is one.
    pub fn seek(&mut self, value: &Decimal) -> bool {
        match self.entries.iter().position(|e| e.value.same_value(value)) {
            Some(idx) => {
                self.selected = idx;
                true
            }
            None => false,
        }
    }
}

pub const IMPERIAL_THREADS: &[&str] = &[
    "8", "9", "10", "11", "11.5", "12", "13", "14", "16", "18", "19", "20", "24", "26", "27",
    "28", "32", "36", "40", "44", "48", "56", "64", "72", "80",
];

pub const IMPERIAL_FEEDS: &[&str] = &[
    ".001", ".002", ".003", ".004", ".005", ".006", ".007", ".008", ".009", ".010", ".011",
    ".012", ".013", ".015", ".017", ".020", ".023", ".026", ".030", ".035", ".040",
];

pub const METRIC_THREADS: &[&str] = &[
    ".20", ".25", ".30", ".35", ".40", ".45", ".50", ".60", ".70", ".75", ".80", "1.00", "1.25",
    "1.50", "1.75", "2.00", "2.50", "3.00", "3.50", "4.00", "4.50", "5.00", "5.50", "6.00",
];

pub const METRIC_FEEDS: &[&str] = &[
    ".02", ".05", ".07", ".10", ".12", ".15", ".17", ".20", ".22", ".25", ".27", ".30", ".35",
    ".40", ".45", ".50", ".55", ".60", ".70", ".85", "1.00",
];

/// The four tables, keyed by (metric, thread).
#[derive(Debug, Clone)]
pub struct RatioTableCatalog {
    imperial_feeds: RatioTable,
    imperial_threads: RatioTable,
    metric_feeds: RatioTable,
    metric_threads: RatioTable,
}

impl RatioTableCatalog {
    pub fn new(
        imperial_feeds: RatioTable,
        imperial_threads: RatioTable,
        metric_feeds: RatioTable,
        metric_threads: RatioTable,
    ) -> Self {
        Self {
            imperial_feeds,
            imperial_threads,
            metric_feeds,
            metric_threads,
        }
    }

    /// Standard pitches and feeds for this machine.
    pub fn standard(geometry: &MachineGeometry) -> Result<Self> {
        let kind = |metric, thread| TableKind { metric, thread };
        Ok(Self::new(
            RatioTable::from_labels(geometry, kind(false, false), IMPERIAL_FEEDS, 4)?,
            RatioTable::from_labels(geometry, kind(false, true), IMPERIAL_THREADS, 12)?,
            RatioTable::from_labels(geometry, kind(true, false), METRIC_FEEDS, 4)?,
            RatioTable::from_labels(geometry, kind(true, true), METRIC_THREADS, 6)?,
        ))
    }

    pub fn lookup(&self, metric: bool, is_thread: bool) -> &RatioTable {
        match (metric, is_thread) {
            (false, false) => &self.imperial_feeds,
            (false, true) => &self.imperial_threads,
            (true, false) => &self.metric_feeds,
            (true, true) => &self.metric_threads,
        }
    }

    pub fn lookup_mut(&mut self, metric: bool, is_thread: bool) -> &mut RatioTable {
        match (metric, is_thread) {
            (false, false) => &mut self.imperial_feeds,
            (false, true) => &mut self.imperial_threads,
            (true, false) => &mut self.metric_feeds,
            (true, true) => &mut self.metric_threads,
        }
    }

    pub fn table(&self, kind: TableKind) -> &RatioTable {
        self.lookup(kind.metric, kind.thread)
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut RatioTable {
        self.lookup_mut(kind.metric, kind.thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> MachineGeometry {
        MachineGeometry {
            encoder_resolution: 4096,
            stepper_resolution: 200,
            microsteps: 8,
            leadscrew: Leadscrew::Tpi(12),
        }
    }

    fn value(text: &str) -> Decimal {
        parse_decimal(text).unwrap()
    }

    #[test]
    fn imperial_thread_ratio_is_exact() {
        // 1600 microsteps/turn * 12 TPI / (20 TPI * 4096 counts)
        let r = geometry()
            .ratio_for(TableKind { metric: false, thread: true }, value("20"))
            .unwrap();
        assert_eq!(r, Ratio::new(1600 * 12, 20 * 4096).unwrap());
        assert_eq!(r.numerator(), 15);
        assert_eq!(r.denominator(), 64);
    }

    #[test]
    fn fractional_tpi_matches_tenths_form() {
        let g = geometry();
        let kind = TableKind { metric: false, thread: true };
        let a = g.ratio_for(kind, value("11.5")).unwrap();
        let b = Ratio::new(1600 * 12 * 10, 115 * 4096).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn metric_with_tpi_leadscrew() {
        let kind = TableKind { metric: true, thread: true };
        let r = geometry().ratio_for(kind, value("1.00")).unwrap();
        assert_eq!(r, Ratio::new(100 * 10 * 12 * 1600, 4096 * 100 * 254).unwrap());
    }

    #[test]
    fn metric_with_metric_leadscrew() {
        let g = MachineGeometry { leadscrew: Leadscrew::HundredthsMm(200), ..geometry() };
        let kind = TableKind { metric: true, thread: false };
        // 0.10 mm/rev on a 2 mm leadscrew: 1600 / 20 steps per rev
        let r = g.ratio_for(kind, value(".10")).unwrap();
        assert_eq!(r.scale(4096), 80);
    }

    #[test]
    fn zero_value_has_no_ratio() {
        let kind = TableKind { metric: false, thread: true };
        assert!(geometry().ratio_for(kind, value("0")).is_none());
    }

    #[test]
    fn scale_rounds_half_up() {
        let r = Ratio::new(1, 2).unwrap();
        assert_eq!(r.scale(1), 1);
        assert_eq!(r.scale(2), 1);
        assert_eq!(r.scale(3), 2);
    }

    #[test]
    fn advance_saturates() {
        let mut catalog = RatioTableCatalog::standard(&geometry()).unwrap();
        let table = catalog.lookup_mut(false, true);
        let n = table.len();
        for _ in 0..n {
            table.advance();
        }
        assert_eq!(table.selected_index(), n - 1);
        assert_eq!(table.advance().label, "80");
    }

    #[test]
    fn retreat_saturates() {
        let mut catalog = RatioTableCatalog::standard(&geometry()).unwrap();
        let table = catalog.lookup_mut(true, false);
        for _ in 0..100 {
            table.retreat();
        }
        assert_eq!(table.selected_index(), 0);
        assert_eq!(table.current().label, ".02");
    }

    #[test]
    fn catalog_defaults_and_indicators() {
        let catalog = RatioTableCatalog::standard(&geometry()).unwrap();
        assert_eq!(catalog.lookup(false, false).current().label, ".005");
        assert_eq!(catalog.lookup(false, true).current().label, "24");
        assert_eq!(catalog.lookup(true, true).current().label, ".50");
        assert_eq!(catalog.lookup(true, false).current().label, ".12");
        assert_eq!(
            catalog.lookup(true, true).current().indicators,
            Indicators::THREAD | Indicators::MM
        );
    }

    #[test]
    fn seek_finds_equal_values() {
        let mut catalog = RatioTableCatalog::standard(&geometry()).unwrap();
        let table = catalog.lookup_mut(true, true);
        assert!(table.seek(&value("1.5")));
        assert_eq!(table.current().label, "1.50");
        assert!(!table.seek(&value("1.6")));
        assert_eq!(table.current().label, "1.50");
    }

    #[test]
    fn empty_table_is_rejected() {
        let kind = TableKind { metric: false, thread: false };
        assert!(RatioTable::new(kind, Vec::new(), 0).is_err());
    }
}
