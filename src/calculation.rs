use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CalcError, Result};

/// The closed set of supported arithmetic operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationType {
    Addition,
    Subtraction,
    Multiplication,
    Division,
}

impl CalculationType {
    pub const ALL: [CalculationType; 4] = [
        CalculationType::Addition,
        CalculationType::Subtraction,
        CalculationType::Multiplication,
        CalculationType::Division,
    ];

    /// Wire name of the kind, as used in JSON payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationType::Addition => "addition",
            CalculationType::Subtraction => "subtraction",
            CalculationType::Multiplication => "multiplication",
            CalculationType::Division => "division",
        }
    }

    /// Operator glyph placed between operands in the rendered visual.
    pub fn glyph(&self) -> &'static str {
        match self {
            CalculationType::Addition => "+",
            CalculationType::Subtraction => "-",
            CalculationType::Multiplication => "×",
            CalculationType::Division => "÷",
        }
    }

    /// Human-readable label for detail views.
    pub fn label(&self) -> &'static str {
        match self {
            CalculationType::Addition => "Addition",
            CalculationType::Subtraction => "Subtraction",
            CalculationType::Multiplication => "Multiplication",
            CalculationType::Division => "Division",
        }
    }

    /// Check the arity and domain rules for this kind.
    ///
    /// Division takes exactly two operands and a non-zero divisor; every other
    /// kind takes at least two. All operands must be finite.
    pub fn validate(&self, inputs: &[f64]) -> Result<()> {
        if inputs.iter().any(|value| !value.is_finite()) {
            return Err(CalcError::validation("Inputs must be finite numbers."));
        }

        match self {
            CalculationType::Division => {
                if inputs.len() != 2 {
                    return Err(CalcError::validation(
                        "Division requires exactly two numbers.",
                    ));
                }
                if inputs[1] == 0.0 {
                    return Err(CalcError::validation("Cannot divide by zero."));
                }
            }
            _ => {
                if inputs.len() < 2 {
                    return Err(CalcError::validation(
                        "Inputs must be a list with at least two numbers.",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Validate `inputs` and compute the result.
    pub fn evaluate(&self, inputs: &[f64]) -> Result<f64> {
        self.validate(inputs)?;

        let (first, rest) = (inputs[0], &inputs[1..]);
        let result = match self {
            CalculationType::Addition => inputs.iter().sum(),
            CalculationType::Subtraction => rest.iter().fold(first, |acc, value| acc - value),
            CalculationType::Multiplication => inputs.iter().product(),
            CalculationType::Division => first / rest[0],
        };

        if !result.is_finite() {
            return Err(CalcError::validation("Result is not a finite number."));
        }

        Ok(result)
    }
}

impl fmt::Display for CalculationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationType {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self> {
        CalculationType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CalcError::validation(format!(
                    "Unsupported calculation type: '{s}'. Must be one of addition, subtraction, multiplication, division"
                ))
            })
    }
}

/// A stored arithmetic operation owned by one account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(rename = "type")]
    pub kind: CalculationType,
    pub inputs: Vec<f64>,
    pub result: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Calculation {
    /// Build a new record, computing its result. `updated_at` starts equal to
    /// `created_at`.
    pub fn new(
        owner_id: Uuid,
        kind: CalculationType,
        inputs: Vec<f64>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let result = kind.evaluate(&inputs)?;
        Ok(Calculation {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            inputs,
            result,
            created_at: now,
            updated_at: now,
        })
    }

    /// Textual visual of the operation, e.g. `2 + 3 = 5`.
    pub fn visual(&self) -> String {
        render_visual(self.kind, &self.inputs, self.result)
    }
}

/// Join the operands with the glyph for `kind` and append the result.
pub fn render_visual(kind: CalculationType, inputs: &[f64], result: f64) -> String {
    let separator = format!(" {} ", kind.glyph());
    let operands = inputs
        .iter()
        .map(|value| format_number(*value))
        .collect::<Vec<_>>()
        .join(&separator);
    format!("{} = {}", operands, format_number(result))
}

/// Display form of an operand or result. `f64`'s `Display` already prints
/// whole values without a trailing `.0` (`5`, not `5.0`).
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addition_sums_all_inputs() {
        let result = CalculationType::Addition.evaluate(&[10.0, 5.0, 3.5]).unwrap();
        assert_eq!(result, 18.5);
    }

    #[test]
    fn test_subtraction_is_left_to_right() {
        let result = CalculationType::Subtraction.evaluate(&[20.0, 5.0, 3.0]).unwrap();
        assert_eq!(result, 12.0);
    }

    #[test]
    fn test_multiplication_multiplies_all_inputs() {
        let result = CalculationType::Multiplication.evaluate(&[2.0, 3.0, 4.0]).unwrap();
        assert_eq!(result, 24.0);
    }

    #[test]
    fn test_division_of_two_operands() {
        let result = CalculationType::Division.evaluate(&[10.0, 4.0]).unwrap();
        assert_eq!(result, 2.5);
    }

    #[test]
    fn test_division_by_zero_is_rejected() {
        let err = CalculationType::Division.evaluate(&[10.0, 0.0]).unwrap_err();
        assert!(matches!(err, CalcError::Validation(ref msg) if msg == "Cannot divide by zero."));
    }

    #[test]
    fn test_division_requires_exactly_two_operands() {
        assert!(CalculationType::Division.evaluate(&[100.0, 2.0, 5.0]).is_err());
        assert!(CalculationType::Division.evaluate(&[100.0]).is_err());
    }

    #[test]
    fn test_single_operand_is_rejected() {
        for kind in [
            CalculationType::Addition,
            CalculationType::Subtraction,
            CalculationType::Multiplication,
        ] {
            let err = kind.evaluate(&[5.0]).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Inputs must be a list with at least two numbers."
            );
        }
    }

    #[test]
    fn test_overflowing_result_is_rejected() {
        let err = CalculationType::Multiplication
            .evaluate(&[f64::MAX, 10.0])
            .unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            "addition".parse::<CalculationType>().unwrap(),
            CalculationType::Addition
        );
        assert_eq!(
            "Division".parse::<CalculationType>().unwrap(),
            CalculationType::Division
        );
        let err = "modulus".parse::<CalculationType>().unwrap_err();
        assert!(err.to_string().contains("Unsupported calculation type"));
    }

    #[test]
    fn test_visual_uses_operator_glyph() {
        let now = Utc::now();
        let calc = Calculation::new(
            Uuid::new_v4(),
            CalculationType::Addition,
            vec![2.0, 3.0],
            now,
        )
        .unwrap();
        assert_eq!(calc.result, 5.0);
        assert_eq!(calc.visual(), "2 + 3 = 5");
        assert_eq!(calc.created_at, calc.updated_at);

        assert_eq!(
            render_visual(CalculationType::Division, &[7.0, 2.0], 3.5),
            "7 ÷ 2 = 3.5"
        );
    }

    #[test]
    fn test_json_shape() {
        let calc = Calculation::new(
            Uuid::new_v4(),
            CalculationType::Subtraction,
            vec![20.0, 5.0],
            Utc::now(),
        )
        .unwrap();
        let value = serde_json::to_value(&calc).unwrap();
        assert_eq!(value["type"], "subtraction");
        assert_eq!(value["result"], 15.0);
        assert!(value.get("owner_id").is_some());
        assert!(value.get("created_at").is_some());
    }
}
