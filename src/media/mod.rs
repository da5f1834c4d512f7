//! Uploaded media and its remote lifecycle.

mod types;

pub use types::{
    image_mime_type, video_mime_type, ImageFormat, MediaHandle, MediaKind, MediaState, RemoteFile,
};
