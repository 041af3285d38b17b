//! # Type System
//!
//! Values, column types and operator schemas shared by every executor.
//!
//! ## Module Structure
//!
//! - `data_type`: `DataType` discriminant with byte widths
//! - `value`: Runtime `Value<'a>` with a total order and join equality
//! - `column`: `ColumnDef` and `Schema`
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `DataType` | Storage-level type discriminant |
//! | `Value<'a>` | Runtime value |
//! | `ColumnDef` | Column definition with metadata |
//! | `Schema` | Ordered columns produced by an operator |

mod column;
mod data_type;
mod value;

pub use column::{ColumnDef, Schema};
pub use data_type::DataType;
pub use value::Value;
