//! Argument parsing for `[YOUTUBE:…]` and `[SPOTIFY:…]` directives.

use url::Url;

const YOUTUBE_ID_LEN: usize = 11;
const SPOTIFY_KINDS: &[&str] = &["track", "album", "playlist"];

/// Extract an 11-character video id from a YouTube URL or a bare id.
///
/// Accepts `youtu.be/<id>`, `youtube.com/watch?v=<id>` and the `/embed/`,
/// `/shorts/`, `/live/` and `/v/` path forms, with or without scheme.
pub(crate) fn youtube_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_video_id(input) {
        return Some(input.to_string());
    }

    let url = parse_lenient(input)?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host);

    let mut segments = url.path_segments()?.filter(|segment| !segment.is_empty());
    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(name, _)| name == "v")
                .map(|(_, value)| value.into_owned()),
            Some("embed" | "shorts" | "live" | "v") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Extract `<kind>/<id>` from a Spotify URI or `open.spotify.com` URL.
pub(crate) fn spotify_path(input: &str) -> Option<String> {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix("spotify:") {
        let (kind, id) = rest.split_once(':')?;
        return spotify_pair(kind, id);
    }

    let url = parse_lenient(input)?;
    if url.host_str()? != "open.spotify.com" {
        return None;
    }
    let mut segments = url
        .path_segments()?
        .filter(|segment| !segment.is_empty() && !segment.starts_with("intl-"));
    let kind = segments.next()?;
    let id = segments.next()?;
    spotify_pair(kind, id)
}

fn spotify_pair(kind: &str, id: &str) -> Option<String> {
    let valid_id = !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric());
    (SPOTIFY_KINDS.contains(&kind) && valid_id).then(|| format!("{kind}/{id}"))
}

fn is_video_id(value: &str) -> bool {
    value.len() == YOUTUBE_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn parse_lenient(input: &str) -> Option<Url> {
    Url::parse(input)
        .ok()
        .filter(|url| url.has_host())
        .or_else(|| Url::parse(&format!("https://{input}")).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_accepts_common_url_forms() {
        let expected = Some("dQw4w9WgXcQ".to_string());
        for input in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ] {
            assert_eq!(youtube_id(input), expected, "{input}");
        }
    }

    #[test]
    fn youtube_rejects_other_hosts_and_bad_ids() {
        assert_eq!(youtube_id("https://vimeo.com/123"), None);
        assert_eq!(youtube_id("https://youtu.be/short"), None);
        assert_eq!(youtube_id("not a url at all"), None);
    }

    #[test]
    fn spotify_accepts_uris_and_urls() {
        assert_eq!(
            spotify_path("spotify:track:4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some("track/4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            spotify_path("https://open.spotify.com/intl-de/album/1DFixLWuPkv3KT3TnV35m3?si=x")
                .as_deref(),
            Some("album/1DFixLWuPkv3KT3TnV35m3")
        );
        assert_eq!(
            spotify_path("open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M").as_deref(),
            Some("playlist/37i9dQZF1DXcBWIGoYBM5M")
        );
    }

    #[test]
    fn spotify_rejects_unsupported_kinds() {
        assert_eq!(spotify_path("https://open.spotify.com/artist/abc"), None);
        assert_eq!(spotify_path("https://example.com/track/abc"), None);
    }
}
