//! Video-URL parsing
//!
//! Extracts the video ID from a pasted share link: the segment between the
//! last `/` and the following `?`, or the end of the string when there is no
//! query. IDs are restricted to the characters YouTube uses.

/// Extract the video ID from a share URL, or None if the URL has no usable
/// ID segment.
pub fn extract_video_id(url: &str) -> Option<&str> {
    let tail = &url[url.rfind('/')? + 1..];
    let id = match tail.find('?') {
        Some(i) => &tail[..i],
        None => tail,
    };

    if id.is_empty() || !id.bytes().all(is_video_id_byte) {
        return None;
    }
    Some(id)
}

fn is_video_id_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
