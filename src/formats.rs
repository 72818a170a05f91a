//! Format filtering, format-code resolution and display labels

use crate::types::{Format, VideoInfo};

/// Codec sentinel meaning "stream absent"
pub const NO_CODEC: &str = "none";

/// Audio-only preference chain, first available wins
pub const AUDIO_ONLY_CHAIN: [&str; 3] = ["bestaudio[ext=m4a]", "bestaudio", "best"];

fn has_codec(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != NO_CODEC)
}

impl Format {
    /// Carries a video stream
    pub fn has_video(&self) -> bool {
        has_codec(self.vcodec.as_deref())
    }

    /// Carries an audio stream
    pub fn has_audio(&self) -> bool {
        has_codec(self.acodec.as_deref())
    }

    /// Can be offered for download: non-empty id and at least one real codec
    pub fn is_selectable(&self) -> bool {
        !self.format_id.is_empty() && (self.has_video() || self.has_audio())
    }

    /// Audio stream without video
    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    /// Option label: `<format> - <ext> - 1.23 MB`
    pub fn label(&self) -> String {
        let size = match self.filesize {
            Some(bytes) => format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0)),
            None => "unknown size".to_string(),
        };
        let name = self.format.as_deref().unwrap_or(&self.format_id);
        format!("{} - {} - {}", name, self.ext, size)
    }
}

/// Formats that may be offered for download, in service order
pub fn selectable_formats(formats: &[Format]) -> Vec<Format> {
    formats.iter().filter(|f| f.is_selectable()).cloned().collect()
}

/// Resolve the audio-only preference chain against the offered formats
pub fn resolve_audio_only(formats: &[Format]) -> &'static str {
    let audio: Vec<&Format> = formats
        .iter()
        .filter(|f| f.is_selectable() && f.is_audio_only())
        .collect();

    if audio.iter().any(|f| f.ext.eq_ignore_ascii_case("m4a")) {
        AUDIO_ONLY_CHAIN[0]
    } else if !audio.is_empty() {
        AUDIO_ONLY_CHAIN[1]
    } else {
        AUDIO_ONLY_CHAIN[2]
    }
}

/// Format code for a download request.
///
/// `audio_only` and an explicit format are mutually exclusive: the flag wins
/// and the explicit choice is ignored.
pub fn resolve_format_code(
    audio_only: bool,
    selected_format_id: Option<&str>,
    formats: &[Format],
) -> Option<String> {
    if audio_only {
        return Some(resolve_audio_only(formats).to_string());
    }
    selected_format_id
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn host_blocked(media_url: &str, blocked_hosts: &[String]) -> bool {
    match url::Url::parse(media_url) {
        Ok(parsed) => parsed.host_str().is_some_and(|host| {
            blocked_hosts
                .iter()
                .any(|b| host == b || host.ends_with(&format!(".{}", b)))
        }),
        Err(_) => blocked_hosts.iter().any(|b| media_url.contains(b.as_str())),
    }
}

/// Preview URL for a chosen format: must carry video and not be on a blocked host
pub fn preview_for_format(format: &Format, blocked_hosts: &[String]) -> Option<String> {
    let media_url = format.url.as_deref().filter(|u| !u.is_empty())?;
    if !format.has_video() || host_blocked(media_url, blocked_hosts) {
        return None;
    }
    Some(media_url.to_string())
}

/// First combined audio+video format with a direct URL, for batch previews
pub fn combined_preview(formats: &[Format]) -> Option<String> {
    formats
        .iter()
        .find(|f| f.has_video() && f.has_audio() && f.url.as_deref().is_some_and(|u| !u.is_empty()))
        .and_then(|f| f.url.clone())
}

/// Duration label: `1h 2m 3s`, `2m 5s`; None when unknown or zero
pub fn format_duration(seconds: Option<f64>) -> Option<String> {
    let total = seconds.filter(|s| *s > 0.0)?.round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        Some(format!("{}h {}m {}s", h, m, s))
    } else {
        Some(format!("{}m {}s", m, s))
    }
}

impl VideoInfo {
    /// Title or "Unknown Title"
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Unknown Title".to_string())
    }

    /// Uploader or "Unknown"
    pub fn display_uploader(&self) -> String {
        self.uploader
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Duration label or "Unknown"
    pub fn display_duration(&self) -> String {
        format_duration(self.duration).unwrap_or_else(|| "Unknown".to_string())
    }

    /// Subtitle language codes; empty means the subtitle control is disabled
    pub fn subtitle_languages(&self) -> Vec<String> {
        self.subtitles.keys().cloned().collect()
    }
}
