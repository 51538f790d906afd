pub mod detection_models;

pub use detection_models::{Detection, Label, SubLabel, TimelineRow};
