use super::cell::{CellError, CellValue};

/// One generated ratio column: `values[numerator] / values[denominator]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioPair {
    pub label: String,
    pub numerator: usize,
    pub denominator: usize,
}

/// Every pair `i < j` as `i/j`, optionally followed by its inverse `j/i`.
pub fn ratio_pairs(labels: &[String], include_inverse: bool) -> Vec<RatioPair> {
    let mut pairs = Vec::new();
    for i in 0..labels.len() {
        for j in i + 1..labels.len() {
            pairs.push(RatioPair {
                label: format!("{}/{}", labels[i], labels[j]),
                numerator: i,
                denominator: j,
            });
            if include_inverse {
                pairs.push(RatioPair {
                    label: format!("{}/{}", labels[j], labels[i]),
                    numerator: j,
                    denominator: i,
                });
            }
        }
    }
    pairs
}

/// Divide two cells; an errored operand makes the ratio `InvalidOperand`.
pub fn divide(values: &[(&str, CellValue)], pair: &RatioPair) -> CellValue {
    let (num_label, num) = &values[pair.numerator];
    let (den_label, den) = &values[pair.denominator];
    let num = num
        .as_ref()
        .map_err(|_| CellError::InvalidOperand(num_label.to_string()))?;
    let den = den
        .as_ref()
        .map_err(|_| CellError::InvalidOperand(den_label.to_string()))?;
    if *den == 0.0 {
        return Err(CellError::ZeroDenominator);
    }
    let ratio = num / den;
    if ratio.is_finite() {
        Ok(ratio)
    } else {
        Err(CellError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("r{i}")).collect()
    }

    #[test]
    fn test_pair_counts() {
        assert_eq!(ratio_pairs(&labels(1), false).len(), 0);
        assert_eq!(ratio_pairs(&labels(2), false).len(), 1);
        assert_eq!(ratio_pairs(&labels(4), false).len(), 6);
        assert_eq!(ratio_pairs(&labels(4), true).len(), 12);

        let pairs = ratio_pairs(&labels(3), true);
        let names: Vec<&str> = pairs.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(names, ["r1/r2", "r2/r1", "r1/r3", "r3/r1", "r2/r3", "r3/r2"]);
    }

    #[test]
    fn test_divide() {
        let values = [("a", Ok(6.0)), ("b", Ok(0.0)), ("c", Err(CellError::OutOfDomain))];
        let pair = |numerator, denominator| RatioPair {
            label: String::new(),
            numerator,
            denominator,
        };
        assert_eq!(divide(&values, &pair(0, 0)), Ok(1.0));
        assert_eq!(divide(&values, &pair(0, 1)), Err(CellError::ZeroDenominator));
        assert_eq!(divide(&values, &pair(1, 0)), Ok(0.0));
        assert_eq!(
            divide(&values, &pair(2, 0)),
            Err(CellError::InvalidOperand("c".into()))
        );
    }
}
