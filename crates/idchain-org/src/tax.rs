//! Local subject validation: country codes and tax identifiers.
//!
//! Validation runs before any network call so malformed subjects never reach
//! the ledger. Tax-ID checksums are only enforced for countries with a
//! registered validator; elsewhere any non-empty identifier is accepted.
use thiserror::Error;

/// An error relating to subject validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxError {
    /// Country code is not two ASCII uppercase letters.
    #[error("Invalid country code: {0}.")]
    InvalidCountryCode(String),
    /// Tax identifier failed the country's checksum.
    #[error("Invalid tax ID for country {0}.")]
    InvalidTaxId(String),
}

/// Checks an ISO 3166-1 alpha-2 country code shape.
pub fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// Validates a tax identifier for a country.
pub fn validate_tax_id(country_code: &str, tax_id: &str) -> Result<(), TaxError> {
    if !is_country_code(country_code) {
        return Err(TaxError::InvalidCountryCode(country_code.to_string()));
    }
    let valid = match country_code {
        "ES" => is_spanish_tax_id(tax_id),
        _ => !tax_id.trim().is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(TaxError::InvalidTaxId(country_code.to_string()))
    }
}

/// Spanish NIF/CIF control-character check.
fn is_spanish_tax_id(tax_id: &str) -> bool {
    // Uppercase, strip whitespace and hyphens.
    let sanitized: String = tax_id
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if sanitized.len() != 9 {
        return false;
    }
    let chars: Vec<char> = sanitized.chars().collect();
    let letter = chars[0];
    let control = chars[8];
    if !letter.is_ascii_uppercase() {
        return false;
    }

    let mut sum: u32 = 0;
    for (i, &c) in chars[1..8].iter().enumerate() {
        let mut digit = match c.to_digit(10) {
            Some(d) => d,
            None => return false,
        };
        if i % 2 == 0 {
            digit *= 2;
            if digit > 9 {
                digit = digit / 10 + digit % 10;
            }
        }
        sum += digit;
    }
    let digit = (10 - sum % 10) % 10;

    const CONTROL_LETTERS: [char; 10] = ['J', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];
    let digit_control = char::from_digit(digit, 10).unwrap_or('?');
    let letter_control = CONTROL_LETTERS[digit as usize];
    if "NPQRSW".contains(letter) {
        control == letter_control
    } else {
        control == digit_control || control == letter_control
    }
}
