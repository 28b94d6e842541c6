use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CostDrillError, Result};

/// Currency used when the upstream response does not name one
pub const DEFAULT_CURRENCY: &str = "USD";

/// Non-negative cost amount in a single currency unit
///
/// Amounts are `Decimal` so repeated summation across thousands of line items
/// never drifts by a cent. Arithmetic between two different units fails with
/// [`CostDrillError::CurrencyMismatch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    unit: String,
}

#[derive(Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_unit() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl TryFrom<MoneyRepr> for Money {
    type Error = CostDrillError;

    fn try_from(repr: MoneyRepr) -> Result<Self> {
        Money::new(repr.amount, &repr.unit)
    }
}

impl Money {
    pub fn new(amount: Decimal, unit: &str) -> Result<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CostDrillError::NegativeAmount(amount.to_string()));
        }
        Ok(Self {
            amount: amount.normalize(),
            unit: unit.to_uppercase(),
        })
    }

    pub fn usd(amount: Decimal) -> Result<Self> {
        Self::new(amount, DEFAULT_CURRENCY)
    }

    pub fn zero(unit: &str) -> Self {
        Self {
            amount: Decimal::ZERO,
            unit: unit.to_uppercase(),
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn ensure_same_unit(&self, other: &Money) -> Result<()> {
        if self.unit != other.unit {
            return Err(CostDrillError::CurrencyMismatch {
                left: self.unit.clone(),
                right: other.unit.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.ensure_same_unit(other)?;
        Ok(Self {
            amount: (self.amount + other.amount).normalize(),
            unit: self.unit.clone(),
        })
    }

    /// Subtract, flooring the result at zero
    pub fn saturating_sub(&self, other: &Money) -> Result<Money> {
        self.ensure_same_unit(other)?;
        let difference = self.amount - other.amount;
        Ok(Self {
            amount: difference.max(Decimal::ZERO).normalize(),
            unit: self.unit.clone(),
        })
    }

    /// Divide by a positive quantity; a non-positive divisor yields zero
    pub fn per(&self, divisor: Decimal) -> Money {
        if divisor <= Decimal::ZERO {
            return Money::zero(&self.unit);
        }
        Self {
            amount: (self.amount / divisor).normalize(),
            unit: self.unit.clone(),
        }
    }

    /// Multiply by a non-negative factor; negative factors yield zero
    pub fn times(&self, factor: Decimal) -> Money {
        Self {
            amount: (self.amount * factor.max(Decimal::ZERO)).normalize(),
            unit: self.unit.clone(),
        }
    }

    /// Share of `whole` as a percentage, zero when `whole` is zero
    pub fn percentage_of(&self, whole: &Money) -> Decimal {
        if whole.amount.is_zero() {
            return Decimal::ZERO;
        }
        (self.amount / whole.amount * Decimal::ONE_HUNDRED).normalize()
    }

    pub fn round_dp(&self, decimal_places: u32) -> Money {
        Self {
            amount: self.amount.round_dp(decimal_places),
            unit: self.unit.clone(),
        }
    }

    /// Sum a sequence of amounts that must all share `unit`
    pub fn sum<'a, I>(unit: &str, amounts: I) -> Result<Money>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(unit), |acc, money| acc.checked_add(money))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_money(self, 2))
    }
}

/// Format an amount with the currency's symbol and a fixed number of decimals
pub fn format_money(money: &Money, decimal_places: u32) -> String {
    let amount = money.amount.round_dp(decimal_places);
    let formatted_amount = format!("{:.width$}", amount, width = decimal_places as usize);

    match money.unit.as_str() {
        "USD" => format!("${}", formatted_amount),
        "GBP" => format!("£{}", formatted_amount),
        "EUR" => format!("{} €", formatted_amount),
        "JPY" | "CNY" => format!("{} ¥", formatted_amount),
        other => format!("{} {}", formatted_amount, other),
    }
}
