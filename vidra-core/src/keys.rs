//! Deterministic object-store key derivation.
//!
//! Every worker write is path-idempotent: keys are derived from the
//! immutable video code, so a redelivered job overwrites the keys of the
//! earlier attempt instead of orphaning them.

use vidra_model::VideoCode;

pub fn source_key(code: &VideoCode, ext: &str) -> String {
    format!("videos/{code}/original.{ext}")
}

pub fn hls_prefix(code: &VideoCode) -> String {
    format!("hls/{code}")
}

pub fn master_playlist_key(code: &VideoCode) -> String {
    format!("hls/{code}/master.m3u8")
}

pub fn variant_playlist_key(code: &VideoCode, quality: &str) -> String {
    format!("hls/{code}/{quality}/index.m3u8")
}

pub fn thumbnail_key(code: &VideoCode) -> String {
    format!("hls/{code}/thumb.jpg")
}

pub fn gallery_prefix(code: &VideoCode) -> String {
    format!("gallery/{code}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_per_code() {
        let code = VideoCode::parse("abc12345").unwrap();
        assert_eq!(source_key(&code, "mp4"), "videos/abc12345/original.mp4");
        assert_eq!(hls_prefix(&code), "hls/abc12345");
        assert_eq!(master_playlist_key(&code), "hls/abc12345/master.m3u8");
        assert_eq!(
            variant_playlist_key(&code, "720p"),
            "hls/abc12345/720p/index.m3u8"
        );
        assert_eq!(thumbnail_key(&code), "hls/abc12345/thumb.jpg");
        assert_eq!(gallery_prefix(&code), "gallery/abc12345");
    }
}
