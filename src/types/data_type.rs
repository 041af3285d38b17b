//! # Column Data Types
//!
//! `DataType` is the metadata-free type discriminant attached to every column
//! of an operator schema. Operators never interpret values through it; it only
//! determines how many bytes a column is charged when sizing pages.
//!
//! ## Byte Widths
//!
//! | Type | Width |
//! |------|-------|
//! | Bool | 1 |
//! | Int2 | 2 |
//! | Int4, Float4, Date | 4 |
//! | Int8, Float8, Timestamp | 8 |
//! | TimestampTz | 12 |
//! | Uuid, Decimal | 16 |
//! | Text, Blob, Varchar, Char | declared length or `DEFAULT_VARLEN_WIDTH` |

/// Storage-level type discriminant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool = 0,
    Int2 = 1,
    Int4 = 2,
    Int8 = 3,
    Float4 = 4,
    Float8 = 5,
    Date = 6,
    Timestamp = 8,
    TimestampTz = 9,
    Uuid = 10,

    Text = 20,
    Blob = 21,
    Varchar = 24,
    Char = 25,

    Decimal = 30,
}

impl DataType {
    /// Returns the fixed byte size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int2 => Some(2),
            DataType::Int4 => Some(4),
            DataType::Int8 => Some(8),
            DataType::Float4 => Some(4),
            DataType::Float8 => Some(8),
            DataType::Date => Some(4),
            DataType::Timestamp => Some(8),
            DataType::TimestampTz => Some(12),
            DataType::Uuid => Some(16),
            DataType::Decimal => Some(16),
            DataType::Text | DataType::Blob | DataType::Varchar | DataType::Char => None,
        }
    }

    /// Returns true if this type requires variable-length encoding.
    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }

    /// Returns true if this is a numeric type (integer or float).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int2
                | DataType::Int4
                | DataType::Int8
                | DataType::Float4
                | DataType::Float8
                | DataType::Decimal
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int2 => "INT2",
            DataType::Int4 => "INT4",
            DataType::Int8 => "INT8",
            DataType::Float4 => "FLOAT4",
            DataType::Float8 => "FLOAT8",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::TimestampTz => "TIMESTAMPTZ",
            DataType::Uuid => "UUID",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Varchar => "VARCHAR",
            DataType::Char => "CHAR",
            DataType::Decimal => "DECIMAL",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_types_have_no_fixed_size() {
        assert!(DataType::Text.is_variable());
        assert!(DataType::Varchar.is_variable());
        assert_eq!(DataType::Int8.fixed_size(), Some(8));
        assert_eq!(DataType::TimestampTz.fixed_size(), Some(12));
    }
}
