//! Separation of user-visible output from model reasoning spans

mod classifier;
mod markers;

pub use classifier::{ClassifiedOutput, ClassifierSnapshot, StreamClassifier, VisibleSink};
pub use markers::MarkerPair;
