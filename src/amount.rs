use std::fmt;

/// Fixed-point decimal with 2 decimal places, stored as a scaled integer
/// (smallest currency unit, e.g. paise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 100;

    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    /// Construct from a smallest-currency-unit value (the payment gateway's
    /// `money` field arrives already scaled).
    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Multiply by a basis-point fraction (10_000 bps = 100%), rounding
    /// half up. Used for recharge commission percentages and the
    /// withdrawal fee.
    pub fn mul_bps(self, bps: u32) -> Self {
        let scaled = self.0 as i128 * bps as i128;
        Amount(((scaled + 5_000) / 10_000) as i64)
    }

    /// Multiply by a whole number of days (plan yearly income).
    pub fn mul_days(self, days: u32) -> Self {
        Amount(self.0.saturating_mul(days as i64))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:02}")
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}
