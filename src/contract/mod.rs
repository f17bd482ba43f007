// src/contract/mod.rs - Task input/output contracts and their validator

pub mod schema;
pub mod validator;

pub use schema::{FieldSchema, FieldType, InputContract, OutputContract};
pub use validator::{SchemaValidator, ValidationError, ValidationReport, ViolationKind};
