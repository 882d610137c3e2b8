pub mod features;
pub mod homography;
pub mod matching;
pub mod ransac;
