//! Volu query model
//!
//! Defines the types shared between the result cache and the warehouse
//! adapters: tabular results, typed bound parameters and the
//! [`QueryExecutor`] seam.

pub mod executor;
pub mod params;
pub mod table;

pub use executor::{ExecutorError, QueryExecutor, QueryRequest};
pub use params::{parse_param_arg, parse_param_args, ParamError, ParamType, ParamValue, Params};
pub use table::{Table, TableError, Value};
