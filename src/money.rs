//! Fixed-point monetary types.
//!
//! Every balance, stake and payout in the engine is an [`Amount`]: an `i128`
//! count of micro-units (10^-6). All arithmetic stays in integer space;
//! floating point appears only at config/presentation boundaries. Repeated
//! small credits therefore never drift the way `f64` accumulation does.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use std::str::FromStr;

/// User identifier as assigned by the account system.
pub type UserId = u64;

/// Monetary amount in micro-units (six decimal places).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i128);

impl Amount {
    pub const SCALE: i128 = 1_000_000;
    pub const ZERO: Amount = Amount(0);

    pub const fn from_micros(micros: i128) -> Self {
        Amount(micros)
    }

    /// Whole units, e.g. `Amount::from_units(24)` is 24.000000.
    pub const fn from_units(units: i64) -> Self {
        Amount(units as i128 * Self::SCALE)
    }

    /// Lossy conversion for config and wire boundaries only.
    pub fn from_f64(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i128)
    }

    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub const fn micros(&self) -> i128 {
        self.0
    }

    /// Integer part, truncated toward zero.
    pub const fn whole_units(&self) -> i128 {
        self.0 / Self::SCALE
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub const fn abs(&self) -> Self {
        Amount(self.0.abs())
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Multiply by `num/den` with flooring division. Payout formulas apply
    /// ratios stepwise (odds first, then fee) so the flooring order is part
    /// of the observable house rules.
    pub fn mul_ratio(&self, num: u32, den: u32) -> Amount {
        debug_assert!(den != 0);
        Amount(self.0 * num as i128 / den as i128)
    }

    pub fn mul_int(&self, factor: u32) -> Amount {
        Amount(self.0 * factor as i128)
    }

    /// Floor to whole units (drops the fractional part).
    pub fn floor_units(&self) -> Amount {
        Amount(self.whole_units() * Self::SCALE)
    }

    /// Last digit of the micro-unit representation. Bet-type selection in the
    /// banker/player game keys off this digit.
    pub fn last_micro_digit(&self) -> u8 {
        (self.0.rem_euclid(10)) as u8
    }

    /// Last significant digit of the canonical decimal rendering, e.g.
    /// 15 -> 5, 24.50 -> 5, 10.001 -> 1. Odd/even direction keys off this.
    pub fn last_significant_decimal_digit(&self) -> u8 {
        let rendered = self.to_string();
        rendered
            .bytes()
            .rev()
            .find(|b| b.is_ascii_digit())
            .map(|b| b - b'0')
            .unwrap_or(0)
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        self.0 += other.0;
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, other: Amount) -> Amount {
        Amount(self.0 - other.0)
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let frac = format!("{:06}", frac);
            write!(f, "{}{}.{}", sign, whole, frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (sign, body) = match s.strip_prefix('-') {
            Some(rest) => (-1i128, rest),
            None => (1i128, s),
        };
        let (whole_str, frac_str) = match body.split_once('.') {
            Some((w, fr)) => (w, fr),
            None => (body, ""),
        };
        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(format!("invalid amount: {:?}", s));
        }
        if frac_str.len() > 6 {
            return Err(format!("amount {:?} exceeds 6 decimal places", s));
        }
        let whole: i128 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| format!("invalid amount: {:?}", s))?
        };
        let mut frac: i128 = 0;
        for c in frac_str.chars() {
            let d = c.to_digit(10).ok_or_else(|| format!("invalid amount: {:?}", s))?;
            frac = frac * 10 + d as i128;
        }
        frac *= 10i128.pow(6 - frac_str.len() as u32);
        Ok(Amount(sign * (whole * Self::SCALE + frac)))
    }
}

// Amounts travel as decimal strings so JSON never sees lossy floats.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Supported asset denominations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Usdt,
    Trx,
    Eth,
    Sol,
    Bnb,
}

impl Currency {
    pub fn all() -> [Currency; 6] {
        [
            Currency::Usd,
            Currency::Usdt,
            Currency::Trx,
            Currency::Eth,
            Currency::Sol,
            Currency::Bnb,
        ]
    }

    /// USD and USDT are both treated as one dollar by the rate gateway.
    pub fn is_usd_pegged(&self) -> bool {
        matches!(self, Currency::Usd | Currency::Usdt)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
            Currency::Trx => "TRX",
            Currency::Eth => "ETH",
            Currency::Sol => "SOL",
            Currency::Bnb => "BNB",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "USDT" => Ok(Currency::Usdt),
            "TRX" => Ok(Currency::Trx),
            "ETH" => Ok(Currency::Eth),
            "SOL" => Ok(Currency::Sol),
            "BNB" => Ok(Currency::Bnb),
            other => Err(format!("unknown currency: {}", other)),
        }
    }
}

/// Chains the platform holds custodial wallets on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Blockchain {
    Tron,
    Ethereum,
    Bnb,
    Solana,
}

impl Blockchain {
    pub fn all() -> [Blockchain; 4] {
        [
            Blockchain::Tron,
            Blockchain::Ethereum,
            Blockchain::Bnb,
            Blockchain::Solana,
        ]
    }

    pub fn native_currency(&self) -> Currency {
        match self {
            Blockchain::Tron => Currency::Trx,
            Blockchain::Ethereum => Currency::Eth,
            Blockchain::Bnb => Currency::Bnb,
            Blockchain::Solana => Currency::Sol,
        }
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Blockchain::Tron => "Tron",
            Blockchain::Ethereum => "Ethereum",
            Blockchain::Bnb => "BNB",
            Blockchain::Solana => "Solana",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Blockchain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tron" => Ok(Blockchain::Tron),
            "ethereum" | "eth" => Ok(Blockchain::Ethereum),
            "bnb" => Ok(Blockchain::Bnb),
            "solana" | "sol" => Ok(Blockchain::Solana),
            other => Err(format!("unknown blockchain: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trip() {
        for s in ["0", "24", "24.5", "0.000001", "-3.14", "1000000.123456"] {
            let a: Amount = s.parse().unwrap();
            assert_eq!(a.to_string(), s);
        }
    }

    #[test]
    fn rejects_too_many_decimals() {
        assert!("1.1234567".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn ratio_math_floors_stepwise() {
        // 10 * 195/100 = 19.5, then * 99/100 = 19.305
        let a = Amount::from_units(10).mul_ratio(195, 100).mul_ratio(99, 100);
        assert_eq!(a, "19.305".parse().unwrap());
    }

    #[test]
    fn floor_units_drops_fraction() {
        let a: Amount = "12.999999".parse().unwrap();
        assert_eq!(a.floor_units(), Amount::from_units(12));
    }

    #[test]
    fn last_digit_helpers() {
        let a = Amount::from_units(24);
        assert_eq!(a.whole_units() % 10, 4);
        assert_eq!(a.last_micro_digit(), 0);

        let b: Amount = "15".parse().unwrap();
        assert_eq!(b.last_significant_decimal_digit(), 5);
        let c: Amount = "24.50".parse().unwrap();
        assert_eq!(c.last_significant_decimal_digit(), 5);
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let a: Amount = "19.305".parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"19.305\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
