//! Cross-module idempotency laws: everything a redelivered job writes
//! must land on the same keys with the same logical content.

use std::str::FromStr;

use vidra_core::keys;
use vidra_core::pipeline::master_playlist;
use vidra_model::{Quality, VideoCode};

#[test]
fn storage_keyset_is_a_pure_function_of_the_code() {
    let code = VideoCode::parse("tape0042").unwrap();

    let first = [
        keys::source_key(&code, "mp4"),
        keys::hls_prefix(&code),
        keys::master_playlist_key(&code),
        keys::variant_playlist_key(&code, "720p"),
        keys::thumbnail_key(&code),
        keys::gallery_prefix(&code),
    ];
    let second = [
        keys::source_key(&code, "mp4"),
        keys::hls_prefix(&code),
        keys::master_playlist_key(&code),
        keys::variant_playlist_key(&code, "720p"),
        keys::thumbnail_key(&code),
        keys::gallery_prefix(&code),
    ];
    assert_eq!(first, second);

    // Everything hangs off the code, so two assets can never collide.
    let other = VideoCode::parse("tape0043").unwrap();
    assert_ne!(keys::hls_prefix(&code), keys::hls_prefix(&other));
}

#[test]
fn repeated_runs_produce_identical_master_playlists() {
    // The logical playlist (variant list and ordering) is deterministic
    // even though individual segments may differ between encoder runs.
    let ladder = [Quality::Q720p, Quality::Q480p];
    assert_eq!(master_playlist(&ladder), master_playlist(&ladder));

    let reordered = [Quality::Q480p, Quality::Q720p];
    assert_eq!(master_playlist(&ladder), master_playlist(&reordered));
}

#[test]
fn ladder_filtering_matches_the_boundary_contract() {
    // A [1080p, 720p] request against a 480p source produces a
    // single-variant ladder.
    let requested: Vec<Quality> = ["1080p", "720p"]
        .iter()
        .map(|label| Quality::from_str(label).unwrap())
        .collect();
    let ladder = Quality::filter_ladder(&requested, 480);
    assert_eq!(ladder, vec![Quality::Q480p]);

    let playlist = master_playlist(&ladder);
    let variant_lines: Vec<&str> = playlist
        .lines()
        .filter(|line| line.ends_with("index.m3u8"))
        .collect();
    assert_eq!(variant_lines, vec!["480p/index.m3u8"]);
}

#[test]
fn variant_keys_cover_the_published_layout() {
    let code = VideoCode::parse("tape0042").unwrap();
    assert_eq!(
        keys::master_playlist_key(&code),
        format!("{}/master.m3u8", keys::hls_prefix(&code))
    );
    assert_eq!(
        keys::thumbnail_key(&code),
        format!("{}/thumb.jpg", keys::hls_prefix(&code))
    );
    for quality in Quality::ALL {
        let key = keys::variant_playlist_key(&code, quality.label());
        assert!(key.starts_with(&keys::hls_prefix(&code)));
        assert!(key.ends_with("index.m3u8"));
    }
}
