use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_derive::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Body posted by the donation form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DonationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub token: String,
    pub amount: String,
    pub text_other: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DonationError {
    #[error("amount {0:?} is not a decimal number")]
    InvalidAmount(String),
    #[error("amount {0} is negative")]
    NegativeAmount(Decimal),
    #[error("amount is zero")]
    ZeroAmount,
    #[error("amount {0} is too large to charge")]
    AmountTooLarge(Decimal),
    #[error("donor email is empty")]
    MissingEmail,
}

/// A donation with its authoritative amount resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Donation {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub token: String,
    pub amount: Decimal,
}

impl Donation {
    /// Resolves the amount (a non-blank `TextOther` overrides `Amount`) and
    /// parses it. Sign, zero and email checks are left to [`Donation::validate`].
    pub fn from_form(form: DonationForm) -> Result<Self, DonationError> {
        let raw = match form.text_other.as_deref().map(str::trim) {
            Some(other) if !other.is_empty() => other.to_string(),
            _ => form.amount.trim().to_string(),
        };
        let amount = Decimal::from_str(&raw).map_err(|_| DonationError::InvalidAmount(raw))?;

        Ok(Self {
            first_name: form.first_name,
            last_name: form.last_name,
            email: form.email,
            token: form.token,
            amount,
        })
    }

    pub fn validate(&self) -> Result<(), DonationError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(DonationError::NegativeAmount(self.amount));
        }
        // Zero is judged on the charged cents, so "0.004" is zero too.
        if self.minor_units()? == 0 {
            return Err(DonationError::ZeroAmount);
        }
        // The email is the CRM lookup key.
        if self.email.trim().is_empty() {
            return Err(DonationError::MissingEmail);
        }
        Ok(())
    }

    /// Amount in cents, rounded half away from zero.
    pub fn minor_units(&self) -> Result<i64, DonationError> {
        to_minor_units(self.amount).ok_or(DonationError::AmountTooLarge(self.amount))
    }
}

/// `None` when the amount has no `i64` cent representation.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
