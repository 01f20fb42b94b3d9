//! Arithmetic on decimal-string native amounts.
//!
//! Native amounts are integers in an asset's smallest unit, carried as
//! decimal strings. All math goes through unsigned 256-bit integers; binary
//! floats never touch an amount.

use ethnum::U256;
use std::cmp::Ordering;

use crate::errors::{Result, StakeError};

/// One hundred percent, in basis points.
pub const MAX_BASIS_POINTS: u32 = 10_000;

pub fn parse(amount: &str) -> Result<U256> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(StakeError::Amount("empty amount".to_string()));
    }
    U256::from_str_radix(trimmed, 10).map_err(|_| StakeError::Amount(amount.to_string()))
}

pub fn add(a: &str, b: &str) -> Result<String> {
    let sum = parse(a)?
        .checked_add(parse(b)?)
        .ok_or_else(|| StakeError::Amount(format!("overflow adding {a} and {b}")))?;
    Ok(sum.to_string())
}

/// Subtraction that refuses to go negative. Amounts are unsigned, so an
/// underflow always signals a sizing bug upstream.
pub fn sub(a: &str, b: &str) -> Result<String> {
    let diff = parse(a)?
        .checked_sub(parse(b)?)
        .ok_or_else(|| StakeError::Amount(format!("underflow subtracting {b} from {a}")))?;
    Ok(diff.to_string())
}

pub fn mul(a: &str, factor: u64) -> Result<String> {
    let product = parse(a)?
        .checked_mul(U256::new(factor as u128))
        .ok_or_else(|| StakeError::Amount(format!("overflow multiplying {a} by {factor}")))?;
    Ok(product.to_string())
}

/// `a * b / c` with full 256-bit intermediates, truncating.
pub fn mul_div(a: &str, b: &str, c: &str) -> Result<String> {
    let divisor = parse(c)?;
    if divisor == U256::ZERO {
        return Err(StakeError::Amount(format!("division by zero: {a} * {b} / {c}")));
    }
    let product = parse(a)?
        .checked_mul(parse(b)?)
        .ok_or_else(|| StakeError::Amount(format!("overflow multiplying {a} by {b}")))?;
    Ok((product / divisor).to_string())
}

pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(parse(a)?.cmp(&parse(b)?))
}

pub fn gt(a: &str, b: &str) -> Result<bool> {
    Ok(compare(a, b)? == Ordering::Greater)
}

pub fn gte(a: &str, b: &str) -> Result<bool> {
    Ok(compare(a, b)? != Ordering::Less)
}

pub fn is_zero(amount: &str) -> Result<bool> {
    Ok(parse(amount)? == U256::ZERO)
}

pub fn max(a: &str, b: &str) -> Result<String> {
    Ok(if gte(a, b)? { a.to_string() } else { b.to_string() })
}

/// The fraction `part / whole` expressed in basis points, capped at 100%.
/// A zero `whole` is treated as a full withdrawal rather than an error.
pub fn to_basis_points(part: &str, whole: &str) -> Result<u32> {
    let whole = parse(whole)?;
    if whole == U256::ZERO {
        return Ok(MAX_BASIS_POINTS);
    }
    let scaled = parse(part)?
        .checked_mul(U256::new(MAX_BASIS_POINTS as u128))
        .ok_or_else(|| StakeError::Amount(format!("overflow scaling {part}")))?;
    let bps = scaled / whole;
    Ok((bps.min(U256::new(MAX_BASIS_POINTS as u128))).as_u32())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub() {
        assert_eq!(add("5000000000", "2500000000").unwrap(), "7500000000");
        assert_eq!(sub("5000000000", "2500000000").unwrap(), "2500000000");
        assert!(sub("1", "2").is_err());
        assert!(parse("not-a-number").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_mul_div() {
        assert_eq!(mul("21000", 2).unwrap(), "42000");
        assert_eq!(mul_div("10", "3", "4").unwrap(), "7");
        assert!(mul_div("1", "1", "0").is_err());
    }

    #[test]
    fn test_large_amounts() {
        // Amounts past u128 still work: 2^130
        let big = "1361129467683753853853498429727072845824";
        assert_eq!(sub(&add(big, "1").unwrap(), "1").unwrap(), big);
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(to_basis_points("5000", "10000").unwrap(), 5000);
        assert_eq!(to_basis_points("10000", "10000").unwrap(), 10000);
        // Requests past the redeemable total cap at 100%
        assert_eq!(to_basis_points("20000", "10000").unwrap(), 10000);
        assert_eq!(to_basis_points("1", "10000").unwrap(), 1);
        assert_eq!(to_basis_points("1", "0").unwrap(), 10000);
    }
}
