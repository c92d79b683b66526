//! Registration payload carried through a pay-to-register payment.
//!
//! Captured when the payment is created, stored in the ledger row's `fields`,
//! and consumed once when the payment succeeds.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Months granted when a payment does not say otherwise.
pub const DEFAULT_SUBSCRIPTION_MONTHS: u32 = 1;

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Plaintext until the account is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub referral_code: Option<String>,

    /// Referrer resolved at payment creation. Informational; the code is re-resolved on success.
    pub referrer_id: Option<String>,

    pub subscription: Option<SubscriptionChoice>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionChoice {
    /// Number of months, as a number or a numeric string.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
}

impl RegistrationData {
    pub fn subscription_months(&self) -> u32 {
        parse_months(self.subscription.as_ref().and_then(|s| s.kind.as_ref()))
    }

    /// Upper-cased referral code, if one was given.
    pub fn normalized_referral_code(&self) -> Option<String> {
        self.referral_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase)
    }

    /// Username, email, and password, when all three are present and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        Some((
            non_blank(&self.username)?.trim(),
            non_blank(&self.email)?.trim(),
            non_blank(&self.password)?,
        ))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

impl fmt::Debug for RegistrationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationData")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("referral_code", &self.referral_code)
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Parse a month count from a JSON number or numeric string.
///
/// Missing, unparsable, or non-positive values yield the default of one month.
pub fn parse_months(value: Option<&Value>) -> u32 {
    let months = match value {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.trunc() as i64),
        Some(Value::String(s)) => leading_integer(s),
        _ => None,
    };

    match months {
        Some(m) if m > 0 => u32::try_from(m).unwrap_or(DEFAULT_SUBSCRIPTION_MONTHS),
        _ => DEFAULT_SUBSCRIPTION_MONTHS,
    }
}

/// Integer prefix of a string, so `"3 months"` reads as 3.
fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn months_accept_numbers_and_strings() {
        assert_eq!(parse_months(Some(&json!(3))), 3);
        assert_eq!(parse_months(Some(&json!("6"))), 6);
        assert_eq!(parse_months(Some(&json!("12 months"))), 12);
    }

    #[test]
    fn months_default_to_one() {
        assert_eq!(parse_months(None), 1);
        assert_eq!(parse_months(Some(&json!("abc"))), 1);
        assert_eq!(parse_months(Some(&json!(0))), 1);
        assert_eq!(parse_months(Some(&json!(null))), 1);
    }

    #[test]
    fn payload_parses_with_partial_fields() {
        let data: RegistrationData = serde_json::from_value(json!({
            "username": "ann",
            "email": "ann@example.com",
            "password": "secret1",
            "referralCode": "abcd1234",
            "referrerId": null,
            "subscription": {"type": "3"}
        }))
        .unwrap();

        assert_eq!(data.subscription_months(), 3);
        assert_eq!(data.normalized_referral_code().as_deref(), Some("ABCD1234"));
        assert_eq!(data.credentials(), Some(("ann", "ann@example.com", "secret1")));

        let empty_subscription: RegistrationData =
            serde_json::from_value(json!({"subscription": {}})).unwrap();
        assert_eq!(empty_subscription.subscription_months(), 1);
        assert_eq!(empty_subscription.credentials(), None);
    }

    #[test]
    fn debug_output_hides_password() {
        let data = RegistrationData {
            password: Some("hunter22".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", data);
        assert!(!rendered.contains("hunter22"));
    }
}
