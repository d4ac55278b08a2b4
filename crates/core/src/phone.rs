//! Phone number normalization helpers
//!
//! Numbers arrive in many shapes (`whatsapp:+5214921234567`,
//! `+52 492 123 4567`, `4921234567`). Matching is always done on the
//! last 10 digits; outbound sends use the Mexican WhatsApp E.164 form.

/// Strip the transport prefix and everything that is not a digit.
pub fn digits_only(raw: &str) -> String {
    raw.trim_start_matches("whatsapp:")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

/// Last 10 digits, the national significant number in Mexico.
pub fn last_ten(raw: &str) -> String {
    let digits = digits_only(raw);
    let start = digits.len().saturating_sub(10);
    digits[start..].to_string()
}

/// Whether two raw numbers refer to the same line.
pub fn same_number(a: &str, b: &str) -> bool {
    let (a, b) = (last_ten(a), last_ten(b));
    !a.is_empty() && a == b
}

/// Mexican mobile E.164 with the WhatsApp `1` infix: `+521` + 10 digits.
pub fn mx_e164(raw: &str) -> String {
    format!("+521{}", last_ten(raw))
}

/// Outbound WhatsApp address for the gateway.
pub fn whatsapp_address(raw: &str) -> String {
    format!("whatsapp:{}", mx_e164(raw))
}
