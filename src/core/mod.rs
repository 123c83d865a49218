pub mod columns;
pub mod etl;
pub mod expr;
pub mod pipeline;
pub mod schema;
pub mod spatial;
pub mod targets;

pub use crate::domain::model::{StepReport, TransformResult};
pub use crate::domain::ports::{Pipeline, SridLookup, Storage};
pub use crate::utils::error::Result;
