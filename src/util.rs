// Utility helpers for parsing, basic statistics and number formatting.
//
// This module centralizes the "dirty" CSV/number handling so the engine can
// assume clean, typed values.
use num_format::{Locale, ToFormattedString};
use std::cmp::Ordering;

/// Lenient numeric parse for CSV cells. Surrounding whitespace and `,`
/// thousands separators are ignored; blank cells and anything containing a
/// letter (model codes such as "N3", unit suffixes) give `None`.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_alphabetic()) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok()
}

pub fn average(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    let sum: f64 = v.iter().copied().sum();
    Some(sum / v.len() as f64)
}

/// Population (`ddof = 0`) or sample (`ddof = 1`) standard deviation.
pub fn std_dev(v: &[f64], ddof: usize) -> Option<f64> {
    if v.len() <= ddof {
        return None;
    }
    let mean = average(v)?;
    let ss: f64 = v.iter().map(|x| (x - mean).powi(2)).sum();
    Some((ss / (v.len() - ddof) as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks. `q` in [0, 1].
pub fn quantile(mut v: Vec<f64>, q: f64) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(v[lo] + (v[hi] - v[lo]) * frac)
}

pub fn median(v: Vec<f64>) -> Option<f64> {
    quantile(v, 0.5)
}

/// Pearson coefficient of paired samples. `None` when either side is
/// constant or there are fewer than two pairs.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (a, b) in pairs {
        let da = a - mean_a;
        let db = b - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // 1234567.891 with 2 decimals -> "1,234,567.89"
    if !n.is_finite() {
        return "n/a".to_string();
    }
    let s = format!("{:.*}", decimals, n.abs());
    let neg = n.is_sign_negative() && s.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let mut res = match int_part.parse::<u128>() {
        Ok(int_val) => int_val.to_formatted_string(&Locale::en),
        Err(_) => int_part.to_string(),
    };
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// `format_number` for optional statistics; unavailable values print as `n/a`.
pub fn format_opt(n: Option<f64>, decimals: usize) -> String {
    n.map(|v| format_number(v, decimals))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Thin wrapper around `num-format` for counts in console messages.
    n.to_formatted_string(&Locale::en)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_safe_rejects_text() {
        assert_eq!(parse_f64_safe(Some(" 3,785.41 ")), Some(3785.41));
        assert_eq!(parse_f64_safe(Some("N3")), None);
        assert_eq!(parse_f64_safe(Some("Eléctricos")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn std_dev_population_and_sample() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v, 0).unwrap() - 2.0).abs() < 1e-12);
        assert!((std_dev(&v, 1).unwrap() - 2.138089935299395).abs() < 1e-12);
        assert_eq!(std_dev(&[1.0], 1), None);
    }

    #[test]
    fn quantile_interpolates() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(v.clone(), 0.25), Some(1.75));
        assert_eq!(median(v.clone()), Some(2.5));
        assert_eq!(quantile(v, 1.0), Some(4.0));
        assert_eq!(quantile(vec![], 0.5), None);
    }

    #[test]
    fn pearson_detects_perfect_relationships() {
        let up = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!((pearson(&up).unwrap() - 1.0).abs() < 1e-12);
        let down = [(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)];
        assert!((pearson(&down).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[(1.0, 1.0), (1.0, 2.0)]), None);
    }

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-0.004, 2), "0.00");
        assert_eq!(format_number(-12.5, 1), "-12.5");
        assert_eq!(format_number(42.0, 0), "42");
        assert_eq!(format_number(1e19, 2), "10,000,000,000,000,000,000.00");
        assert_eq!(format_number(-2.5e20, 0), "-250,000,000,000,000,000,000");
        assert!(format_number(1e300, 0).starts_with("1000000"));
        assert_eq!(format_opt(None, 2), "n/a");
        assert_eq!(format_int(9855usize), "9,855");
    }
}
