// Numeric coercion for pasted cells

/// Parse a cell as a number, tolerating thousands separators.
///
/// Whitespace and commas are removed before parsing; decimal points and signs
/// are kept. Anything that does not parse to a finite number yields `0.0`.
pub fn to_number_strict(cell: &str) -> f64 {
    let cleaned: String = cell
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// [`to_number_strict`] for a cell that may be missing entirely.
pub fn to_number_strict_opt(cell: Option<&str>) -> f64 {
    cell.map_or(0.0, to_number_strict)
}
