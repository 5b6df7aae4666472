//! Reply templates and request arguments.
//!
//! A reply template is an ordered list of [`Field`]s matched left to right
//! against one reply line. Literal fields must match byte for byte, capture
//! fields produce one [`Value`] each, and the whole line must be consumed.

use super::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Exact text.
    Literal(&'static str),
    /// Unsigned integer of exactly this many digits.
    Uint(usize),
    /// Digits of fixed width that are matched but not captured.
    Skip(usize),
    /// Signed decimal, optionally with exponent.
    Float,
    /// Text up to the next whitespace.
    Word,
    /// Everything left on the line.
    Rest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u32),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Uint(v) => Some(f64::from(*v)),
            Value::Text(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Uint(v) => v.fmt(f),
            Value::Float(v) => v.fmt(f),
            Value::Text(s) => s.fmt(f),
        }
    }
}

/// Byte offset at which a line stopped matching its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch(pub usize);

pub fn parse_line(template: &[Field], line: &str) -> Result<Vec<Value>, Mismatch> {
    let bytes = line.as_bytes();
    let mut pos = 0;
    let mut values = Vec::new();

    for field in template {
        match *field {
            Field::Literal(text) => {
                if !bytes[pos..].starts_with(text.as_bytes()) {
                    return Err(Mismatch(pos));
                }
                pos += text.len();
            }
            Field::Uint(width) | Field::Skip(width) => {
                let end = pos + width;
                if end > bytes.len() {
                    return Err(Mismatch(pos));
                }
                if let Some(bad) = bytes[pos..end].iter().position(|b| !b.is_ascii_digit()) {
                    return Err(Mismatch(pos + bad));
                }
                if let Field::Uint(_) = field {
                    let value = line[pos..end].parse::<u32>().map_err(|_| Mismatch(pos))?;
                    values.push(Value::Uint(value));
                }
                pos = end;
            }
            Field::Float => {
                pos = skip_whitespace(bytes, pos);
                let end = scan_float(bytes, pos).ok_or(Mismatch(pos))?;
                let value = line[pos..end].parse::<f64>().map_err(|_| Mismatch(pos))?;
                values.push(Value::Float(value));
                pos = end;
            }
            Field::Word => {
                pos = skip_whitespace(bytes, pos);
                let end = bytes[pos..]
                    .iter()
                    .position(|b| b.is_ascii_whitespace())
                    .map_or(bytes.len(), |n| pos + n);
                if end == pos {
                    return Err(Mismatch(pos));
                }
                values.push(Value::Text(line[pos..end].to_string()));
                pos = end;
            }
            Field::Rest => {
                pos = skip_whitespace(bytes, pos);
                values.push(Value::Text(line[pos..].trim_end().to_string()));
                pos = bytes.len();
            }
        }
    }

    if pos != bytes.len() {
        return Err(Mismatch(pos));
    }
    Ok(values)
}

fn skip_whitespace(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(bytes.len(), |n| pos + n)
}

fn scan_digits(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |n| pos + n)
}

// Returns the end of the longest float literal starting at `pos`.
fn scan_float(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut end = pos;
    if matches!(bytes.get(end), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_end = scan_digits(bytes, end);
    let mut digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = scan_digits(bytes, end + 1);
        digits += frac_end - (end + 1);
        end = frac_end;
    }
    if digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_end = scan_digits(bytes, exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    Some(end)
}

/// Numeric argument accepted by a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    None,
    /// Always sent, never supplied by the caller.
    Fixed(u32),
    Int { min: u32, max: u32 },
    Choice(&'static [u32]),
    Float { precision: usize },
}

impl Arg {
    pub fn render(&self, command: &'static str, value: Option<f64>) -> Result<String, ProtocolError> {
        match (*self, value) {
            (Arg::None, None) => Ok(String::new()),
            (Arg::Fixed(code), None) => Ok(code.to_string()),
            (Arg::None, Some(_)) | (Arg::Fixed(_), Some(_)) => {
                Err(ProtocolError::UnexpectedArgument(command))
            }
            (_, None) => Err(ProtocolError::MissingArgument(command)),
            (Arg::Int { min, max }, Some(v)) => {
                let n = whole(command, v)?;
                if n < min || n > max {
                    return Err(ProtocolError::InvalidArgument { command, value: v });
                }
                Ok(n.to_string())
            }
            (Arg::Choice(allowed), Some(v)) => {
                let n = whole(command, v)?;
                if !allowed.contains(&n) {
                    return Err(ProtocolError::InvalidArgument { command, value: v });
                }
                Ok(n.to_string())
            }
            (Arg::Float { precision }, Some(v)) => {
                if !v.is_finite() {
                    return Err(ProtocolError::InvalidArgument { command, value: v });
                }
                Ok(format!("{:.*}", precision, v))
            }
        }
    }

    /// Value the device ends up with, for arguments the caller does not supply.
    pub fn resolve(&self, value: Option<f64>) -> Option<f64> {
        match self {
            Arg::Fixed(code) => Some(f64::from(*code)),
            _ => value,
        }
    }
}

fn whole(command: &'static str, value: f64) -> Result<u32, ProtocolError> {
    if value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Err(ProtocolError::InvalidArgument { command, value })
    }
}
