//! Runtime values for the reference VM.
//!
//! Conversions follow loose PHP-style rules:
//!
//! | From | `to_int` | `is_truthy` | `Display` |
//! |------|----------|-------------|-----------|
//! | `Int(n)` | `n` | `n != 0` | decimal |
//! | `Str(s)` | leading digits of `s` | `s != "" && s != "0"` | `s` |
//! | `Bool(b)` | `0` / `1` | `b` | `true` / `false` |
//! | `Null` | `0` | `false` | `null` |

use std::fmt;

use crate::constants::Constant;

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value in the VM.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    #[default]
    Null,
}

impl Value {
    /// Integer conversion. Strings parse like C `atoi`: optional leading
    /// whitespace and sign, then as many digits as are present.
    pub fn to_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Str(s) => parse_leading_int(s),
            Value::Bool(b) => i64::from(*b),
            Value::Null => 0,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }

    /// Loose `==`.
    ///
    /// Int and string compare numerically; a bool against an int or string
    /// compares truthiness. Any other mix of types is unequal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Int(_), Value::Str(_)) | (Value::Str(_), Value::Int(_)) => {
                self.to_int() == other.to_int()
            }
            (Value::Bool(_), Value::Int(_) | Value::Str(_))
            | (Value::Int(_) | Value::Str(_), Value::Bool(_)) => {
                self.is_truthy() == other.is_truthy()
            }
            _ => false,
        }
    }

    /// Strict `===`: same type and same value.
    pub fn identical(&self, other: &Value) -> bool {
        self == other
    }

    /// Loose `<`.
    pub fn less_than(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a < b,
            (Value::Str(a), Value::Str(b)) => a < b,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                !self.is_truthy() && other.is_truthy()
            }
            _ => self.to_int() < other.to_int(),
        }
    }

    /// Loose `>`: neither equal nor less.
    pub fn greater_than(&self, other: &Value) -> bool {
        !self.loose_eq(other) && !self.less_than(other)
    }
}

fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut n: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = n.wrapping_mul(10).wrapping_add(i64::from(b - b'0'));
    }
    if negative {
        n.wrapping_neg()
    } else {
        n
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => f.write_str("null"),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(n) => Value::Int(*n),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn test_to_int_reads_leading_digits() {
        assert_eq!(s("42abc").to_int(), 42);
        assert_eq!(s("  -7").to_int(), -7);
        assert_eq!(s("abc").to_int(), 0);
        assert_eq!(Value::Bool(true).to_int(), 1);
        assert_eq!(Value::Null.to_int(), 0);
    }

    #[test]
    fn test_truthiness() {
        assert!(!s("").is_truthy());
        assert!(!s("0").is_truthy());
        assert!(s("0.0").is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(5).loose_eq(&s("5")));
        assert!(Value::Bool(true).loose_eq(&Value::Int(3)));
        assert!(Value::Bool(false).loose_eq(&s("")));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
        assert!(!s("a").loose_eq(&s("b")));
    }

    #[test]
    fn test_identity_checks_type() {
        assert!(!Value::Int(1).identical(&s("1")));
        assert!(Value::Int(1).identical(&Value::Int(1)));
    }

    #[test]
    fn test_ordering() {
        assert!(Value::Int(1).less_than(&Value::Int(2)));
        assert!(s("10").greater_than(&Value::Int(9)));
        assert!(s("apple").less_than(&s("banana")));
        assert!(Value::Bool(false).less_than(&Value::Int(1)));
        assert!(!Value::Int(2).greater_than(&Value::Int(2)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(s("hi").to_string(), "hi");
    }
}
