//! Master playlist generation.

use vidra_model::Quality;

/// Renders the master playlist for the produced ladder, descending
/// quality order, variant playlists addressed by relative path.
pub fn master_playlist(ladder: &[Quality]) -> String {
    let mut variants: Vec<Quality> = ladder.to_vec();
    variants.sort_by(|a, b| b.height().cmp(&a.height()));
    variants.dedup();

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n\n");
    for quality in variants {
        let (width, height) = quality.resolution();
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
            quality.bandwidth(),
            width,
            height
        ));
        out.push_str(&format!("{}/index.m3u8\n", quality.label()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_order_regardless_of_input() {
        let playlist =
            master_playlist(&[Quality::Q480p, Quality::Q1080p, Quality::Q720p]);
        let lines: Vec<&str> = playlist.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        let order: Vec<&str> = lines
            .iter()
            .filter(|l| l.ends_with("index.m3u8"))
            .copied()
            .collect();
        assert_eq!(
            order,
            vec!["1080p/index.m3u8", "720p/index.m3u8", "480p/index.m3u8"]
        );
    }

    #[test]
    fn stream_inf_carries_bandwidth_and_resolution() {
        let playlist = master_playlist(&[Quality::Q720p]);
        assert!(playlist.contains(
            "#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720"
        ));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = master_playlist(&[Quality::Q720p, Quality::Q480p]);
        let b = master_playlist(&[Quality::Q480p, Quality::Q720p]);
        assert_eq!(a, b);
    }
}
