//! Service layer shared by the request pipeline and its frontends
//!
//! - `progress`: checkpoint stages, progress events and the dialog controls seam
//! - `staging`: temporary-file staging of exported images

pub mod progress;
pub mod staging;

pub use progress::{
    DialogControls, LoggingControls, NoOpControls, ProcessingStage, ProgressEvent,
};
pub use staging::StagedImage;
