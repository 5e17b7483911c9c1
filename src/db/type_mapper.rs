use serde::{Deserialize, Serialize};

/// Canonical view of a PostgreSQL type name, used to judge whether a column
/// type change can lose data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CanonicalType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// `None` precision means unconstrained `numeric`.
    Numeric { precision: Option<u32>, scale: u32 },
    /// `None` length means `character` without a modifier.
    Char(Option<u32>),
    /// `None` length means unbounded `character varying`.
    Varchar(Option<u32>),
    Text,
    Bytea,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    Jsonb,
    Array(Box<CanonicalType>),
    Unknown(String),
}

/// Map a native PostgreSQL type string to the canonical type
pub fn to_canonical(native_type: &str) -> CanonicalType {
    let lower = native_type.trim().to_lowercase();

    if let Some(inner) = lower.strip_suffix("[]") {
        return CanonicalType::Array(Box::new(to_canonical(inner)));
    }

    let (base, args) = split_modifiers(&lower);
    match base.as_str() {
        "boolean" | "bool" => CanonicalType::Boolean,
        "smallint" | "int2" | "smallserial" | "serial2" => CanonicalType::SmallInt,
        "integer" | "int4" | "int" | "serial" | "serial4" => CanonicalType::Int,
        "bigint" | "int8" | "bigserial" | "serial8" => CanonicalType::BigInt,
        "real" | "float4" => CanonicalType::Float,
        "double precision" | "float8" => CanonicalType::Double,
        "float" => match args.first() {
            Some(p) if *p <= 24 => CanonicalType::Float,
            _ => CanonicalType::Double,
        },
        "numeric" | "decimal" => CanonicalType::Numeric {
            precision: args.first().copied(),
            scale: args.get(1).copied().unwrap_or(0),
        },
        // bare `character` is character(1)
        "character" | "char" => CanonicalType::Char(Some(args.first().copied().unwrap_or(1))),
        "bpchar" => CanonicalType::Char(args.first().copied()),
        "character varying" | "varchar" => CanonicalType::Varchar(args.first().copied()),
        "text" => CanonicalType::Text,
        "bytea" => CanonicalType::Bytea,
        "date" => CanonicalType::Date,
        "time" | "time without time zone" => CanonicalType::Time,
        "timetz" | "time with time zone" => CanonicalType::TimeTz,
        "timestamp" | "timestamp without time zone" => CanonicalType::Timestamp,
        "timestamptz" | "timestamp with time zone" => CanonicalType::TimestampTz,
        "interval" => CanonicalType::Interval,
        "uuid" => CanonicalType::Uuid,
        "json" => CanonicalType::Json,
        "jsonb" => CanonicalType::Jsonb,
        _ => CanonicalType::Unknown(lower.clone()),
    }
}

/// Split `numeric(10, 2)` into (`numeric`, [10, 2]). Modifiers in the middle
/// of a name (`timestamp(3) with time zone`) are removed from the base.
fn split_modifiers(lower: &str) -> (String, Vec<u32>) {
    let (Some(open), Some(close)) = (lower.find('('), lower.find(')')) else {
        return (collapse_spaces(lower), Vec::new());
    };
    if close < open {
        return (collapse_spaces(lower), Vec::new());
    }

    let args = lower[open + 1..close]
        .split(',')
        .filter_map(|a| a.trim().parse::<u32>().ok())
        .collect();
    let base = format!("{} {}", &lower[..open], &lower[close + 1..]);
    (collapse_spaces(&base), args)
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decimal digits an integer type can hold.
fn integer_digits(t: &CanonicalType) -> Option<u32> {
    match t {
        CanonicalType::SmallInt => Some(5),
        CanonicalType::Int => Some(10),
        CanonicalType::BigInt => Some(19),
        _ => None,
    }
}

fn fits_length(from: Option<u32>, to: Option<u32>) -> bool {
    match (from, to) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(f), Some(t)) => t >= f,
    }
}

/// True when every value of `from` converts to `to` without loss. Anything
/// that cannot be shown to be lossless counts as narrowing.
pub fn is_widening(from: &str, to: &str) -> bool {
    canonical_widening(&to_canonical(from), &to_canonical(to))
}

fn canonical_widening(from: &CanonicalType, to: &CanonicalType) -> bool {
    use CanonicalType::*;

    if from == to {
        return !matches!(from, Unknown(_));
    }

    match (from, to) {
        (SmallInt | Int | BigInt, SmallInt | Int | BigInt) => {
            integer_digits(from) <= integer_digits(to)
        }
        (SmallInt | Int | BigInt, Numeric { precision, scale }) => match precision {
            None => true,
            Some(p) => integer_digits(from).is_some_and(|d| p.saturating_sub(*scale) >= d),
        },
        (SmallInt | Int, Double) => true,
        (SmallInt, Float) => true,
        (Float, Double) => true,
        (
            Numeric {
                precision: fp,
                scale: fs,
            },
            Numeric {
                precision: tp,
                scale: ts,
            },
        ) => match (fp, tp) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(fp), Some(tp)) => ts >= fs && tp.saturating_sub(*ts) >= fp.saturating_sub(*fs),
        },
        (Char(f), Char(t)) | (Char(f), Varchar(t)) | (Varchar(f), Varchar(t)) => {
            fits_length(*f, *t)
        }
        (Char(_) | Varchar(_), Text) => true,
        (Text, Varchar(None)) => true,
        (Json, Jsonb) | (Jsonb, Json) => true,
        (Date, Timestamp | TimestampTz) => true,
        (Timestamp, TimestampTz) => true,
        (Time, TimeTz) => true,
        (Array(f), Array(t)) => canonical_widening(f, t),
        _ => false,
    }
}

/// A type change that may lose or reject existing values.
pub fn is_narrowing(from: &str, to: &str) -> bool {
    !is_widening(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_postgres_types() {
        assert_eq!(to_canonical("INTEGER"), CanonicalType::Int);
        assert_eq!(to_canonical("int4"), CanonicalType::Int);
        assert_eq!(
            to_canonical("character varying(255)"),
            CanonicalType::Varchar(Some(255))
        );
        assert_eq!(to_canonical("varchar"), CanonicalType::Varchar(None));
        assert_eq!(
            to_canonical("numeric(10, 2)"),
            CanonicalType::Numeric {
                precision: Some(10),
                scale: 2
            }
        );
        assert_eq!(
            to_canonical("timestamp(3) with time zone"),
            CanonicalType::TimestampTz
        );
        assert_eq!(to_canonical("character"), CanonicalType::Char(Some(1)));
        assert_eq!(
            to_canonical("text[]"),
            CanonicalType::Array(Box::new(CanonicalType::Text))
        );
        assert_eq!(
            to_canonical("citext"),
            CanonicalType::Unknown("citext".to_string())
        );
    }

    #[test]
    fn test_integer_widening() {
        assert!(is_widening("smallint", "integer"));
        assert!(is_widening("integer", "bigint"));
        assert!(is_narrowing("bigint", "integer"));
        assert!(is_widening("int4", "integer"));
    }

    #[test]
    fn test_varchar_lengths() {
        assert!(is_widening("varchar(100)", "varchar(255)"));
        assert!(is_narrowing("varchar(255)", "varchar(100)"));
        assert!(is_widening("varchar(255)", "text"));
        assert!(is_narrowing("text", "varchar(255)"));
        assert!(is_widening("varchar(50)", "character varying"));
        assert!(is_widening("char(10)", "varchar(10)"));
    }

    #[test]
    fn test_numeric_precision() {
        assert!(is_widening("numeric(10,2)", "numeric(12,2)"));
        assert!(is_narrowing("numeric(10,2)", "numeric(10,3)"));
        assert!(is_widening("numeric(10,2)", "numeric"));
        assert!(is_narrowing("numeric", "numeric(10,2)"));
        assert!(is_widening("integer", "numeric(12,0)"));
        assert!(is_narrowing("bigint", "numeric(10,0)"));
    }

    #[test]
    fn test_cross_family_is_narrowing() {
        assert!(is_narrowing("text", "integer"));
        assert!(is_narrowing("double precision", "real"));
        assert!(is_narrowing("bigint", "double precision"));
        assert!(is_widening("date", "timestamp"));
    }

    #[test]
    fn test_unknown_types_are_narrowing() {
        assert!(is_narrowing("citext", "citext"));
        assert!(is_narrowing("my_enum", "text"));
    }
}
