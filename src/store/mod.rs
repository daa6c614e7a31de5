//! Input stores: CV documents and daily delivery lists.

pub mod cv;
pub mod daily;

pub use cv::CvStore;
pub use daily::{baseline_date, DailyLoader, DailyPayload};
