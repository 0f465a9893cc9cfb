//! Shipping addresses and the validation policy applied to them.
//!
//! Every field is optional; the policy only checks fields that are
//! present. Defaults match a Bangladeshi deployment but the patterns and
//! division list are configurable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DEFAULT_PHONE_PATTERN: &str = r"^(?:\+88|88)?(01[3-9]\d{8})$";
const DEFAULT_POSTAL_PATTERN: &str = r"^\d{4}$";
const DEFAULT_DIVISIONS: [&str; 8] = [
    "Dhaka",
    "Chittagong",
    "Khulna",
    "Rajshahi",
    "Barisal",
    "Sylhet",
    "Rangpur",
    "Mymensingh",
];

static DEFAULT_PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_PHONE_PATTERN).expect("default phone pattern"));
static DEFAULT_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_POSTAL_PATTERN).expect("default postal pattern"));

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub thana: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
}

impl Address {
    /// Trims every field and drops the ones that end up empty.
    pub fn normalized(self) -> Address {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Address {
            full_name: clean(self.full_name),
            phone: clean(self.phone),
            division: clean(self.division),
            district: clean(self.district),
            thana: clean(self.thana),
            postal_code: clean(self.postal_code),
            street_address: clean(self.street_address),
        }
    }

    /// Field-by-field merge: fields present in `patch` win, absent fields
    /// retain the stored value.
    pub fn merged_with(&self, patch: Address) -> Address {
        let patch = patch.normalized();
        Address {
            full_name: patch.full_name.or_else(|| self.full_name.clone()),
            phone: patch.phone.or_else(|| self.phone.clone()),
            division: patch.division.or_else(|| self.division.clone()),
            district: patch.district.or_else(|| self.district.clone()),
            thana: patch.thana.or_else(|| self.thana.clone()),
            postal_code: patch.postal_code.or_else(|| self.postal_code.clone()),
            street_address: patch.street_address.or_else(|| self.street_address.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AddressPolicy {
    phone: Regex,
    postal: Regex,
    divisions: Vec<String>,
}

impl Default for AddressPolicy {
    fn default() -> Self {
        Self {
            phone: DEFAULT_PHONE.clone(),
            postal: DEFAULT_POSTAL.clone(),
            divisions: DEFAULT_DIVISIONS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl AddressPolicy {
    pub fn new(
        phone_pattern: Option<&str>,
        postal_pattern: Option<&str>,
        divisions: Option<Vec<String>>,
    ) -> Result<Self, regex::Error> {
        let defaults = Self::default();
        Ok(Self {
            phone: match phone_pattern {
                Some(p) => Regex::new(p)?,
                None => defaults.phone,
            },
            postal: match postal_pattern {
                Some(p) => Regex::new(p)?,
                None => defaults.postal,
            },
            divisions: divisions.unwrap_or(defaults.divisions),
        })
    }

    /// Checks the fields that are present; returns the first problem.
    pub fn validate(&self, address: &Address) -> Result<(), String> {
        if let Some(phone) = &address.phone {
            if !self.phone.is_match(phone) {
                return Err(format!("invalid phone number: {phone}"));
            }
        }
        if let Some(division) = &address.division {
            if !self.divisions.iter().any(|d| d == division) {
                return Err(format!("unknown division: {division}"));
            }
        }
        if let Some(postal) = &address.postal_code {
            if !self.postal.is_match(postal) {
                return Err(format!("invalid postal code: {postal}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(phone: Option<&str>, division: Option<&str>, postal: Option<&str>) -> Address {
        Address {
            phone: phone.map(String::from),
            division: division.map(String::from),
            postal_code: postal.map(String::from),
            ..Address::default()
        }
    }

    #[test]
    fn test_policy_accepts_valid_fields() {
        let policy = AddressPolicy::default();
        assert!(policy
            .validate(&addr(Some("+8801712345678"), Some("Dhaka"), Some("1207")))
            .is_ok());
        // absent fields are not checked
        assert!(policy.validate(&Address::default()).is_ok());
    }

    #[test]
    fn test_policy_rejects_bad_fields() {
        let policy = AddressPolicy::default();
        assert!(policy.validate(&addr(Some("12345"), None, None)).is_err());
        assert!(policy.validate(&addr(None, Some("Atlantis"), None)).is_err());
        assert!(policy.validate(&addr(None, None, Some("12a4"))).is_err());
    }

    #[test]
    fn test_merge_keeps_prior_values() {
        let stored = Address {
            full_name: Some("Rahim Uddin".into()),
            phone: Some("01712345678".into()),
            district: Some("Dhaka".into()),
            ..Address::default()
        };
        let patch = Address {
            phone: Some("01898765432".into()),
            // whitespace-only counts as absent
            district: Some("   ".into()),
            ..Address::default()
        };
        let merged = stored.merged_with(patch);
        assert_eq!(merged.full_name.as_deref(), Some("Rahim Uddin"));
        assert_eq!(merged.phone.as_deref(), Some("01898765432"));
        assert_eq!(merged.district.as_deref(), Some("Dhaka"));
    }

    #[test]
    fn test_custom_policy() {
        let policy = AddressPolicy::new(
            Some(r"^\+1\d{10}$"),
            Some(r"^\d{5}$"),
            Some(vec!["North".into(), "South".into()]),
        )
        .unwrap();
        assert!(policy
            .validate(&addr(Some("+12025550147"), Some("North"), Some("90210")))
            .is_ok());
        assert!(policy.validate(&addr(None, Some("Dhaka"), None)).is_err());
    }
}
