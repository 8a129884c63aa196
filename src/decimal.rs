/// Exact decimal values as typed on the panel ("1.5", ".005", "20").
///
/// Values are kept as an integer mantissa and a power-of-ten scale so feed
/// and pitch ratios can be built without any floating point.

use nom::bytes::complete::take_while;
use nom::character::complete::char;
use nom::combinator::{all_consuming, opt};
use nom::sequence::{pair, preceded};
use nom::IResult;
use std::fmt;

/// `mantissa / 10^scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub mantissa: u64,
    pub scale: u32,
}

impl Decimal {
    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// `10^scale`, or None if it does not fit in a u64.
    pub fn denominator(&self) -> Option<u64> {
        10u64.checked_pow(self.scale)
    }

    /// True when both describe the same number ("1.5" == "1.50").
    pub fn same_value(&self, other: &Decimal) -> bool {
        let scale = self.scale.max(other.scale);
        let widen = |d: &Decimal| -> Option<u128> {
            let factor = 10u128.checked_pow(scale - d.scale)?;
            (d.mantissa as u128).checked_mul(factor)
        };
        matches!((widen(self), widen(other)), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let digits = format!("{:0>width$}", self.mantissa, width = self.scale as usize + 1);
        let split = digits.len() - self.scale as usize;
        write!(f, "{}.{}", &digits[..split], &digits[split..])
    }
}

fn digits(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_ascii_digit())(input)
}

fn decimal_parts(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    all_consuming(pair(digits, opt(preceded(char('.'), digits))))(input)
}

/// Parse unsigned decimal text. At least one digit is required; a leading
/// or trailing point is accepted (".005", "20."). Surrounding whitespace
/// and NUL padding are ignored.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let (_, (whole, fraction)) = decimal_parts(trimmed).ok()?;
    let fraction = fraction.unwrap_or("");
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut mantissa: u64 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        let digit = c.to_digit(10)? as u64;
        mantissa = mantissa.checked_mul(10)?.checked_add(digit)?;
    }
    Some(Decimal {
        mantissa,
        scale: fraction.len() as u32,
    })
}
