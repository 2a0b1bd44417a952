//! Playable-file selection and content types.

use crate::swarm::FileDescriptor;

/// Content type used for playable files with no better match.
pub const DEFAULT_VIDEO_TYPE: &str = "video/mp4";

const MEDIA_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("mov", "video/quicktime"),
    ("wmv", "video/x-ms-wmv"),
    ("flv", "video/x-flv"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("ts", "video/mp2t"),
    ("ogv", "video/ogg"),
];

fn extension(name: &str) -> Option<String> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (_, extension) = file_name.rsplit_once('.')?;
    Some(extension.to_ascii_lowercase())
}

/// Whether `name` has an extension from the playable media allow-list.
pub fn is_playable(name: &str) -> bool {
    extension(name).is_some_and(|ext| MEDIA_TYPES.iter().any(|(known, _)| *known == ext))
}

/// Content type for `name`, falling back to [`DEFAULT_VIDEO_TYPE`].
pub fn content_type_for(name: &str) -> &'static str {
    extension(name)
        .and_then(|ext| {
            MEDIA_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, content_type)| *content_type)
        })
        .unwrap_or(DEFAULT_VIDEO_TYPE)
}

/// Picks the largest playable file; ties go to the lowest index.
pub fn select_default_file(files: &[FileDescriptor]) -> Option<&FileDescriptor> {
    files
        .iter()
        .filter(|file| is_playable(&file.name))
        .max_by(|a, b| a.length.cmp(&b.length).then(b.index.cmp(&a.index)))
}
