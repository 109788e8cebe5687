//! # Video Equipment Communications Module
//!
//! Video streams are published on a PUB socket as `[topic, chunk]` messages, where the topic is the
//! name of the stream (for example a camera topic) and the chunks are consecutive slices of a raw
//! MJPEG byte stream. Chunk boundaries carry no meaning, a JPEG image may span any number of
//! chunks.

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// JPEG start of image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end of image marker
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Longest allowed topic name.
pub const MAX_TOPIC_LEN: usize = 128;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check that a topic name is usable as a subscription prefix.
///
/// Topics are non-empty, at most [`MAX_TOPIC_LEN`] bytes, and made of ASCII alphanumerics, `_`,
/// `-` and `/`.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && topic
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'/')
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_valid_topics() {
        assert!(is_valid_topic("camera/image_raw"));
        assert!(is_valid_topic("map_render"));
        assert!(!is_valid_topic(""));
        assert!(!is_valid_topic("cam era"));
        assert!(!is_valid_topic(&"a".repeat(MAX_TOPIC_LEN + 1)));
    }
}
