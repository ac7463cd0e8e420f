//! MIME type detection by file name.

/// Fallback for unknown extensions.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Guess the MIME type from the path's extension.
pub fn guess_from_path(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// Whether `mime` is one of the types remote APIs use for folders.
pub fn is_directory_mime(mime: &str) -> bool {
    matches!(
        mime,
        super::DIRECTORY_MIME_TYPE | "application/vnd.google-apps.folder" | "application/x-directory"
    )
}
