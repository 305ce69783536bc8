use std::fmt;

use url::Url;

use crate::error::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    None,
    DirectMedia,
    EmbeddedProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    YouTube,
    Vimeo,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::YouTube => f.write_str("youtube"),
            Provider::Vimeo => f.write_str("vimeo"),
        }
    }
}

/// A classified media reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A file the direct player fetches itself.
    Direct { reference: String },
    /// A video hosted by a third-party player.
    Embedded {
        reference: String,
        provider: Provider,
        video_id: String,
    },
}

impl MediaSource {
    pub fn classify(raw: &str) -> Result<Self, PlaybackError> {
        let reference = raw.trim();
        if reference.is_empty() {
            return Err(PlaybackError::EmptySource);
        }
        let embedded = Url::parse(reference)
            .ok()
            .and_then(|url| provider_video(&url));
        Ok(match embedded {
            Some((provider, video_id)) => MediaSource::Embedded {
                reference: reference.to_string(),
                provider,
                video_id,
            },
            None => MediaSource::Direct {
                reference: reference.to_string(),
            },
        })
    }

    pub fn reference(&self) -> &str {
        match self {
            MediaSource::Direct { reference } | MediaSource::Embedded { reference, .. } => {
                reference
            }
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        match self {
            MediaSource::Direct { .. } => PlaybackMode::DirectMedia,
            MediaSource::Embedded { .. } => PlaybackMode::EmbeddedProvider,
        }
    }
}

fn provider_video(url: &Url) -> Option<(Provider, String)> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    match host {
        "youtu.be" => youtube_id(segments.next()?).map(|id| (Provider::YouTube, id)),
        "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
            let id = match segments.next()? {
                "watch" => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned())?,
                "embed" | "shorts" | "live" | "v" => segments.next()?.to_string(),
                _ => return None,
            };
            youtube_id(&id).map(|id| (Provider::YouTube, id))
        }
        "vimeo.com" | "player.vimeo.com" => {
            let first = segments.next()?;
            let id = if first == "video" { segments.next()? } else { first };
            (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
                .then(|| (Provider::Vimeo, id.to_string()))
        }
        _ => None,
    }
}

fn youtube_id(candidate: &str) -> Option<String> {
    let valid = candidate.len() == 11
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(raw: &str) -> Option<(Provider, String)> {
        match MediaSource::classify(raw).unwrap() {
            MediaSource::Embedded {
                provider, video_id, ..
            } => Some((provider, video_id)),
            MediaSource::Direct { .. } => None,
        }
    }

    #[test]
    fn recognises_youtube_url_shapes() {
        let expected = Some((Provider::YouTube, "dQw4w9WgXcQ".to_string()));
        assert_eq!(embedded("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"), expected);
        assert_eq!(embedded("https://youtu.be/dQw4w9WgXcQ"), expected);
        assert_eq!(embedded("https://m.youtube.com/embed/dQw4w9WgXcQ"), expected);
        assert_eq!(embedded("https://youtube.com/shorts/dQw4w9WgXcQ"), expected);
    }

    #[test]
    fn recognises_vimeo() {
        assert_eq!(
            embedded("https://vimeo.com/76979871"),
            Some((Provider::Vimeo, "76979871".to_string()))
        );
        assert_eq!(
            embedded("https://player.vimeo.com/video/76979871"),
            Some((Provider::Vimeo, "76979871".to_string()))
        );
    }

    #[test]
    fn everything_else_is_direct_media() {
        let source = MediaSource::classify(" https://example.com/video.mp4 ").unwrap();
        assert_eq!(source.mode(), PlaybackMode::DirectMedia);
        assert_eq!(source.reference(), "https://example.com/video.mp4");
        assert_eq!(embedded("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(embedded("https://www.youtube.com/feed/trending"), None);
        assert_eq!(embedded("movies/local.webm"), None);
    }

    #[test]
    fn empty_source_is_rejected() {
        assert_eq!(MediaSource::classify("  "), Err(PlaybackError::EmptySource));
    }
}
