//! Camera metadata extraction.
//!
//! [`extract_metadata`] recognizes the container and its geometry with the
//! `image` crate, then reads capture settings from the EXIF block with
//! `nom-exif`. Missing or partial EXIF never fails the call: unknown tags
//! are simply absent in the returned [`SettingsRecord`](crate::settings::SettingsRecord).

mod reader;

pub use reader::{ImageMetadata, ImageSize, extract_metadata, read_camera_settings};
