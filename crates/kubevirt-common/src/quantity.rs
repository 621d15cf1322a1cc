//! Kubernetes resource quantity parsing
//!
//! Storage requests are compared numerically, so "8Gi" and "8192Mi" are the
//! same size. Quantities are normalised to thousandths of the base unit so
//! milli-quantities ("300m") fit in the same integer scale.

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Maximum number of fractional digits accepted ("1.125Gi")
const MAX_FRACTION_DIGITS: u32 = 9;

fn suffix_multiplier_millis(suffix: &str) -> Option<u128> {
    const KI: u128 = 1024;
    const K: u128 = 1000;
    let base = match suffix {
        "m" => return Some(1),
        "" => 1,
        "Ki" => KI,
        "Mi" => KI.pow(2),
        "Gi" => KI.pow(3),
        "Ti" => KI.pow(4),
        "Pi" => KI.pow(5),
        "Ei" => KI.pow(6),
        "k" => K,
        "M" => K.pow(2),
        "G" => K.pow(3),
        "T" => K.pow(4),
        "P" => K.pow(5),
        "E" => K.pow(6),
        _ => return None,
    };
    Some(base * 1000)
}

/// Parse a quantity string into thousandths of its base unit
///
/// Accepts plain and decimal numbers with binary (Ki..Ei), decimal (k..E)
/// or milli (m) suffixes. Exponent notation and negative values are rejected.
pub fn parse_quantity_millis(quantity: &str) -> Result<u128, String> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let multiplier = suffix_multiplier_millis(suffix)
        .ok_or_else(|| format!("invalid quantity: {quantity}, unknown suffix {suffix:?}"))?;

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("invalid quantity: {quantity}, missing number"));
    }
    if fraction.contains('.') || fraction.len() as u32 > MAX_FRACTION_DIGITS {
        return Err(format!("invalid quantity: {quantity}, malformed fraction"));
    }

    let digits = format!("{whole}{fraction}");
    let mantissa: u128 = digits
        .parse()
        .map_err(|_| format!("invalid quantity: {quantity}"))?;
    let scale = 10u128.pow(fraction.len() as u32);

    mantissa
        .checked_mul(multiplier)
        .map(|v| v / scale)
        .ok_or_else(|| format!("invalid quantity: {quantity}, value too large"))
}

/// Compare two quantities numerically
pub fn compare_quantities(a: &Quantity, b: &Quantity) -> Result<Ordering, String> {
    Ok(parse_quantity_millis(&a.0)?.cmp(&parse_quantity_millis(&b.0)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity_millis("1Ki").unwrap(), 1024 * 1000);
        assert_eq!(parse_quantity_millis("8Gi").unwrap(), 8 * 1024u128.pow(3) * 1000);
        assert_eq!(parse_quantity_millis("2k").unwrap(), 2_000_000);
        assert_eq!(parse_quantity_millis("2").unwrap(), 2000);
    }

    #[test]
    fn milli_and_fractional_values() {
        assert_eq!(parse_quantity_millis("300m").unwrap(), 300);
        assert_eq!(parse_quantity_millis("1.5").unwrap(), 1500);
        assert_eq!(parse_quantity_millis("0.5Gi").unwrap(), 512 * 1024 * 1024 * 1000);
    }

    #[test]
    fn equivalent_sizes_compare_equal() {
        let a = Quantity("8Gi".to_string());
        let b = Quantity("8192Mi".to_string());
        assert_eq!(compare_quantities(&a, &b).unwrap(), Ordering::Equal);

        let bigger = Quantity("10Gi".to_string());
        assert_eq!(compare_quantities(&a, &bigger).unwrap(), Ordering::Less);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity_millis("").is_err());
        assert!(parse_quantity_millis("Gi").is_err());
        assert!(parse_quantity_millis("8Zi").is_err());
        assert!(parse_quantity_millis("-1Gi").is_err());
        assert!(parse_quantity_millis("1.2.3").is_err());
        assert!(parse_quantity_millis("1e3").is_err());
    }
}
