pub mod error;
pub mod outcome;
pub mod request;
pub mod task;

pub use error::GenerateError;
pub use outcome::GenerationOutcome;
pub use request::{GenerationRequest, ImageRef, OutputFormat, Resolution, ValidationLimits};
pub use task::{TaskHandle, TaskSnapshot, TaskState};
