//! Type mapping between raw SQL column metadata and column declarations.
//!
//! The forward direction turns an introspected column into a declaration
//! descriptor (`string("email", 100).nullable()`), the reverse direction resolves
//! a declaration tag recorded by the extractor back into a SQL type. Both
//! directions share [`normalize_type`] so that comparisons made by the differ and
//! the classifier agree on what "the same type" means.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::snapshot::ColumnSnapshot;

/// Tag used when a raw type has no declaration equivalent.
pub const RAW_COLUMN_TAG: &str = "rawColumn";

/// Raw type used when a declaration tag cannot be resolved.
pub const FALLBACK_RAW_TYPE: &str = "varchar(256)";

static INTEGER_WIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(tinyint|smallint|mediumint|int|bigint)\(\d+\)").expect("integer width pattern")
});

static TEMPORAL_PRECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(timestamp|datetime|time)(tz)?\(\d+\)").expect("temporal precision pattern")
});

static VARCHAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:varchar|character varying)\((\d+)\)$").expect("varchar pattern")
});

static CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:char|character)\((\d+)\)$").expect("char pattern"));

static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:decimal|numeric)\((\d+)\s*,\s*(\d+)\)").expect("decimal pattern")
});

static FLOATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(float|double)\((\d+)\s*,\s*(\d+)\)").expect("floating pattern")
});

static ENUMERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(enum|set)\((.*)\)$").expect("enum pattern"));

/// Normalize a raw SQL type so equivalent spellings compare equal.
///
/// Rules are applied in order: lowercase and trim, exact aliases, integer
/// display-width stripping, temporal precision stripping, then short aliases.
///
/// ```
/// use tidemark_migrate::types::normalize_type;
///
/// assert_eq!(normalize_type("INT(11)"), "integer");
/// assert_eq!(normalize_type("tinyint(1)"), "boolean");
/// assert_eq!(normalize_type("timestamp(6)"), "timestamp");
/// ```
pub fn normalize_type(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();

    match lowered.as_str() {
        "tinyint(1)" => return "boolean".to_string(),
        "double precision" => return "double".to_string(),
        "character varying" => return "varchar".to_string(),
        _ => {}
    }

    let stripped = INTEGER_WIDTH.replace(&lowered, "$1");
    let stripped = TEMPORAL_PRECISION.replace(&stripped, "$1$2");

    match stripped.as_ref() {
        "int" => "integer".to_string(),
        "bool" => "boolean".to_string(),
        "tinyint" => "tinyinteger".to_string(),
        "smallint" => "smallinteger".to_string(),
        "mediumint" => "mediuminteger".to_string(),
        "bigint" => "biginteger".to_string(),
        "real" => "float".to_string(),
        other => other.to_string(),
    }
}

/// Normalize a column default so that equivalent literals compare equal.
///
/// Returns `None` for an absent default and for an explicit `NULL`.
pub fn normalize_default(value: Option<&str>) -> Option<String> {
    let mut value = value?.trim();

    // 'active'::character varying
    if let Some(pos) = value.find("::") {
        value = value[..pos].trim();
    }

    let value = strip_quotes(value);
    let lowered = value.to_lowercase();

    match lowered.as_str() {
        "null" => None,
        "true" | "1" => Some("true".to_string()),
        "false" | "0" => Some("false".to_string()),
        _ if is_expression(&lowered) => Some(lowered),
        _ => Some(value.to_string()),
    }
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn is_expression(lowered: &str) -> bool {
    lowered.contains("current_timestamp")
        || lowered.contains("now()")
        || lowered.contains("nextval")
}

/// A default value as it appears in a column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Boolean literal.
    Boolean(bool),
    /// Numeric literal, rendered verbatim.
    Number(String),
    /// Database expression such as `CURRENT_TIMESTAMP`.
    Expression(String),
    /// String literal.
    Literal(String),
}

impl DefaultValue {
    /// Classify a raw default for a column of the given normalized type.
    pub fn classify(raw: &str, normalized_type: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return None;
        }

        let lowered = trimmed.to_lowercase();
        if is_expression(&lowered) {
            return Some(Self::Expression(trimmed.to_string()));
        }

        let unquoted = strip_quotes(trimmed);
        let unquoted_lower = unquoted.to_lowercase();

        if normalized_type == "boolean" || matches!(unquoted_lower.as_str(), "true" | "false") {
            match unquoted_lower.as_str() {
                "true" | "1" => return Some(Self::Boolean(true)),
                "false" | "0" => return Some(Self::Boolean(false)),
                _ => {}
            }
        }

        if unquoted.parse::<f64>().is_ok() {
            return Some(Self::Number(unquoted.to_string()));
        }

        Some(Self::Literal(unquoted.to_string()))
    }

    /// Render the value as a declaration argument.
    pub fn render(&self) -> String {
        match self {
            Self::Boolean(value) => value.to_string(),
            Self::Number(value) => value.clone(),
            Self::Expression(value) => format!("raw({})", quote_literal(value)),
            Self::Literal(value) => quote_literal(value),
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// A positional argument of a column declaration after the column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationArg {
    /// Length, precision or scale.
    Integer(u32),
    /// Enumerated value list, kept verbatim.
    Values(String),
    /// Original SQL type for unresolved declarations.
    TypeName(String),
}

impl fmt::Display for DeclarationArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Values(values) => write!(f, "[{}]", values),
            Self::TypeName(name) => write!(f, "{}", quote_literal(name)),
        }
    }
}

/// Modifier chained after a column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    /// The column accepts NULL.
    Nullable,
    /// The column has a default value.
    Default(DefaultValue),
}

/// Abstract column declaration produced from raw column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    /// Column name.
    pub column: String,
    /// Declaration tag (`string`, `id`, `decimal`, ...).
    pub tag: String,
    /// Positional arguments after the column name.
    pub args: Vec<DeclarationArg>,
    /// Chained modifiers.
    pub modifiers: Vec<Modifier>,
    /// Whether the raw type had no declaration equivalent.
    pub unresolved: bool,
}

impl ColumnDeclaration {
    fn new(column: &str, tag: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            tag: tag.into(),
            args: Vec::new(),
            modifiers: Vec::new(),
            unresolved: false,
        }
    }

    fn with_args(mut self, args: Vec<DeclarationArg>) -> Self {
        self.args = args;
        self
    }

    /// Check whether the declaration is nullable.
    pub fn is_nullable(&self) -> bool {
        self.modifiers.contains(&Modifier::Nullable)
    }

    /// Get the default modifier, if any.
    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Default(value) => Some(value),
            Modifier::Nullable => None,
        })
    }
}

impl fmt::Display for ColumnDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.tag, quote_literal(&self.column))?;
        for arg in &self.args {
            write!(f, ", {}", arg)?;
        }
        write!(f, ")")?;
        for modifier in &self.modifiers {
            match modifier {
                Modifier::Nullable => write!(f, ".nullable()")?,
                Modifier::Default(value) => write!(f, ".default({})", value.render())?,
            }
        }
        Ok(())
    }
}

/// Map an introspected column to a declaration.
pub fn to_declaration(column: &ColumnSnapshot) -> ColumnDeclaration {
    let raw = column.raw_type.trim();
    let lowered = raw.to_lowercase();
    let normalized = normalize_type(raw);
    let (base, unsigned) = match normalized.strip_suffix(" unsigned") {
        Some(base) => (normalize_type(base), true),
        None => (normalized.clone(), false),
    };

    if column.auto_increment {
        match base.as_str() {
            "biginteger" => return ColumnDeclaration::new(&column.name, "id"),
            "integer" => return ColumnDeclaration::new(&column.name, "increments"),
            _ => {}
        }
    }

    let mut declaration = match_declaration(&column.name, raw, &lowered, &base, unsigned);

    if !column.auto_increment {
        if column.nullable {
            declaration.modifiers.push(Modifier::Nullable);
        }
        if let Some(value) = column
            .default
            .as_deref()
            .and_then(|raw| DefaultValue::classify(raw, &base))
        {
            declaration.modifiers.push(Modifier::Default(value));
        }
    }

    declaration
}

fn match_declaration(
    name: &str,
    raw: &str,
    lowered: &str,
    base: &str,
    unsigned: bool,
) -> ColumnDeclaration {
    if let Some(caps) = VARCHAR.captures(lowered) {
        let length = parse_u32(&caps[1]);
        let args = if length == 255 {
            Vec::new()
        } else {
            vec![DeclarationArg::Integer(length)]
        };
        return ColumnDeclaration::new(name, "string").with_args(args);
    }

    if let Some(caps) = CHAR.captures(lowered) {
        return match parse_u32(&caps[1]) {
            36 => ColumnDeclaration::new(name, "uuid"),
            26 => ColumnDeclaration::new(name, "ulid"),
            length => ColumnDeclaration::new(name, "char")
                .with_args(vec![DeclarationArg::Integer(length)]),
        };
    }

    if let Some(caps) = DECIMAL.captures(lowered) {
        return ColumnDeclaration::new(name, "decimal").with_args(vec![
            DeclarationArg::Integer(parse_u32(&caps[1])),
            DeclarationArg::Integer(parse_u32(&caps[2])),
        ]);
    }

    if let Some(caps) = FLOATING.captures(lowered) {
        return ColumnDeclaration::new(name, &caps[1]).with_args(vec![
            DeclarationArg::Integer(parse_u32(&caps[2])),
            DeclarationArg::Integer(parse_u32(&caps[3])),
        ]);
    }

    if let Some(caps) = ENUMERATION.captures(raw) {
        let tag = caps[1].to_lowercase();
        return ColumnDeclaration::new(name, tag)
            .with_args(vec![DeclarationArg::Values(caps[2].to_string())]);
    }

    match simple_declaration(base) {
        Some(tag) if unsigned && is_integer_tag(tag) => {
            ColumnDeclaration::new(name, format!("unsigned{}", capitalize(tag)))
        }
        Some(tag) => ColumnDeclaration::new(name, tag),
        None => {
            let mut declaration = ColumnDeclaration::new(name, RAW_COLUMN_TAG)
                .with_args(vec![DeclarationArg::TypeName(raw.to_string())]);
            declaration.unresolved = true;
            declaration
        }
    }
}

fn parse_u32(digits: &str) -> u32 {
    digits.parse().unwrap_or(0)
}

fn capitalize(tag: &str) -> String {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_integer_tag(tag: &str) -> bool {
    matches!(
        tag,
        "integer" | "bigInteger" | "smallInteger" | "tinyInteger" | "mediumInteger"
    )
}

/// Simple normalized type to declaration tag lookup.
fn simple_declaration(normalized: &str) -> Option<&'static str> {
    let tag = match normalized {
        "integer" => "integer",
        "biginteger" => "bigInteger",
        "smallinteger" => "smallInteger",
        "tinyinteger" => "tinyInteger",
        "mediuminteger" => "mediumInteger",
        "boolean" => "boolean",
        "varchar" => "string",
        "char" => "char",
        "text" => "text",
        "tinytext" => "tinyText",
        "mediumtext" => "mediumText",
        "longtext" => "longText",
        "date" => "date",
        "datetime" => "dateTime",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestampTz",
        "time" | "time without time zone" => "time",
        "timetz" | "time with time zone" => "timeTz",
        "year" => "year",
        "json" => "json",
        "jsonb" => "jsonb",
        "uuid" => "uuid",
        "blob" | "longblob" | "mediumblob" | "bytea" => "binary",
        "float" => "float",
        "double" => "double",
        "decimal" | "numeric" => "decimal",
        "inet" => "ipAddress",
        "macaddr" => "macAddress",
        _ => return None,
    };
    Some(tag)
}

/// SQL type resolved from a declaration tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedType {
    /// Raw SQL type.
    pub raw_type: String,
    /// Normalized type name.
    pub normalized_type: String,
    /// Whether this is the generic fallback instead of an exact mapping.
    pub approximated: bool,
}

/// Declaration tag to raw SQL type.
const DECLARATION_TYPES: &[(&str, &str)] = &[
    ("id", "bigint"),
    ("bigIncrements", "bigint"),
    ("increments", "int"),
    ("integer", "int"),
    ("bigInteger", "bigint"),
    ("smallInteger", "smallint"),
    ("tinyInteger", "tinyint"),
    ("mediumInteger", "mediumint"),
    ("unsignedInteger", "int"),
    ("unsignedBigInteger", "bigint"),
    ("unsignedSmallInteger", "smallint"),
    ("unsignedTinyInteger", "tinyint"),
    ("unsignedMediumInteger", "mediumint"),
    ("foreignId", "bigint"),
    ("boolean", "tinyint(1)"),
    ("string", "varchar(255)"),
    ("char", "char(255)"),
    ("text", "text"),
    ("tinyText", "tinytext"),
    ("mediumText", "mediumtext"),
    ("longText", "longtext"),
    ("date", "date"),
    ("dateTime", "datetime"),
    ("dateTimeTz", "datetime"),
    ("timestamp", "timestamp"),
    ("timestampTz", "timestamptz"),
    ("softDeletes", "timestamp"),
    ("softDeletesTz", "timestamptz"),
    ("time", "time"),
    ("timeTz", "timetz"),
    ("year", "year"),
    ("json", "json"),
    ("jsonb", "jsonb"),
    ("uuid", "char(36)"),
    ("foreignUuid", "char(36)"),
    ("ulid", "char(26)"),
    ("binary", "blob"),
    ("float", "float"),
    ("double", "double"),
    ("decimal", "decimal(8,2)"),
    ("ipAddress", "varchar(45)"),
    ("macAddress", "varchar(17)"),
    ("rememberToken", "varchar(100)"),
];

/// Resolve a declaration tag to its SQL type, if the tag is known.
pub fn from_declaration(tag: &str) -> Option<ResolvedType> {
    DECLARATION_TYPES
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, raw)| ResolvedType {
            raw_type: (*raw).to_string(),
            normalized_type: normalize_type(raw),
            approximated: false,
        })
}

/// Resolve a declaration tag, falling back to a generic string type.
pub fn resolve_declaration(tag: &str) -> ResolvedType {
    from_declaration(tag).unwrap_or_else(|| ResolvedType {
        raw_type: FALLBACK_RAW_TYPE.to_string(),
        normalized_type: normalize_type(FALLBACK_RAW_TYPE),
        approximated: true,
    })
}
