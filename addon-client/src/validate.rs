//! URL and id validators
//!
//! No I/O, no side effects: pure functions over strings, including the
//! restricted-mode private-network checks spec §4.1 calls for.

use std::net::IpAddr;

/// Schemes accepted for a playable stream URL.
pub const ALLOWED_STREAM_SCHEMES: &[&str] = &[
    "http", "https", "magnet", "acestream", "rtmp", "rtmps", "hls", "mpd", "dash",
];

/// Validate a stream URL per spec §4.1.
///
/// `restricted` mirrors `url.restricted_mode`: when true, HTTP(S) URLs
/// resolving to loopback, RFC-1918, or link-local hosts are rejected.
#[must_use]
pub fn validate_stream_url(url: &str, restricted: bool) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };

    let scheme = parsed.scheme();
    if !ALLOWED_STREAM_SCHEMES.contains(&scheme) {
        return false;
    }

    if scheme == "http" || scheme == "https" {
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if host.is_empty() {
            return false;
        }
        if restricted && is_restricted_host(host) {
            return false;
        }
    }

    true
}

/// Whether `host` is a loopback/private/link-local address, or the literal
/// `localhost`, that restricted mode should reject.
fn is_restricted_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

/// Build the composite episode id `seriesId:season:episode`.
#[must_use]
pub fn build_episode_id(series_id: &str, season: u32, episode: u32) -> String {
    format!("{series_id}:{season}:{episode}")
}

/// Parse a composite episode id back into its parts.
///
/// Round-trip law (spec §8 property 3): `parse_episode_id(build_episode_id(s, S, E))
/// == Some((s, S, E))` for any series id not itself containing `:`-delimited
/// trailing numeric parts that could be misread; series ids in practice
/// (`tt0111161`, `tmdb:12345`) never end in `:<digits>:<digits>`, so the
/// rightmost two colon-separated segments unambiguously identify season/episode.
#[must_use]
pub fn parse_episode_id(id: &str) -> Option<(String, u32, u32)> {
    let mut parts = id.rsplitn(3, ':');
    let episode = parts.next()?.parse::<u32>().ok()?;
    let season = parts.next()?.parse::<u32>().ok()?;
    let series_id = parts.next()?;
    if series_id.is_empty() || season == 0 || episode == 0 {
        return None;
    }
    Some((series_id.to_string(), season, episode))
}

/// Whether `id` is a composite episode id.
#[must_use]
pub fn is_episode_id(id: &str) -> bool {
    parse_episode_id(id).is_some()
}

/// Extract the series id prefix of an episode id, or `id` itself if it is
/// not an episode id (spec §4.1 `get_series_id`).
#[must_use]
pub fn get_series_id(id: &str) -> String {
    parse_episode_id(id).map_or_else(|| id.to_string(), |(series, _, _)| series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_one_url_per_allowed_scheme() {
        let cases = [
            "http://example.com/a",
            "https://example.com/a",
            "magnet:?xt=urn:btih:abcdef",
            "acestream://deadbeef",
            "rtmp://example.com/live",
            "rtmps://example.com/live",
            "hls://example.com/playlist.m3u8",
            "mpd://example.com/manifest.mpd",
            "dash://example.com/manifest",
        ];
        for url in cases {
            assert!(validate_stream_url(url, true), "should accept {url}");
        }
    }

    #[test]
    fn rejects_disallowed_schemes() {
        let cases = ["file:///etc/passwd", "javascript:alert(1)", "data:text/plain;base64,AA=="];
        for url in cases {
            assert!(!validate_stream_url(url, true), "should reject {url}");
        }
    }

    #[test]
    fn restricted_mode_rejects_private_hosts() {
        assert!(!validate_stream_url("http://127.0.0.1/stream.mp4", true));
        assert!(!validate_stream_url("http://192.168.1.5/stream.mp4", true));
        assert!(!validate_stream_url("http://169.254.1.1/stream.mp4", true));
        assert!(!validate_stream_url("http://localhost/stream.mp4", true));
    }

    #[test]
    fn unrestricted_mode_allows_private_hosts() {
        assert!(validate_stream_url("http://127.0.0.1/stream.mp4", false));
    }

    #[test]
    fn episode_id_round_trips() {
        let cases = [("tt0944947", 1u32, 1u32), ("tmdb:12345", 3, 22), ("series-x", 100, 7)];
        for (series, season, episode) in cases {
            let built = build_episode_id(series, season, episode);
            assert!(is_episode_id(&built));
            assert_eq!(parse_episode_id(&built), Some((series.to_string(), season, episode)));
            assert_eq!(get_series_id(&built), series);
        }
    }

    #[test]
    fn non_episode_ids_are_not_episode_ids() {
        assert!(!is_episode_id("tt0111161"));
        assert!(!is_episode_id("tt0111161:1"));
        assert!(!is_episode_id("tt0111161:0:1"));
        assert_eq!(get_series_id("tt0111161"), "tt0111161");
    }
}
