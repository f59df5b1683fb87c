//! SDP munging applied to locally created descriptions
//!
//! Only line-level edits are made: codec order on the m-line, the opus
//! `a=fmtp` line, and `b=AS:` bandwidth caps. Anything not understood is
//! passed through untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opus `a=fmtp` parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusSettings {
    pub min_ptime: u32,
    pub use_inband_fec: bool,
    pub use_dtx: bool,
    pub max_average_bitrate: u32,
    pub stereo: bool,
    pub max_playback_rate: u32,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Self {
            min_ptime: 10,
            use_inband_fec: true,
            use_dtx: true,
            max_average_bitrate: 64_000,
            stereo: false,
            max_playback_rate: 48_000,
        }
    }
}

impl OpusSettings {
    fn fmtp(&self, payload: &str) -> String {
        format!(
            "a=fmtp:{} minptime={};useinbandfec={};usedtx={};maxaveragebitrate={};stereo={};maxplaybackrate={}",
            payload,
            self.min_ptime,
            u8::from(self.use_inband_fec),
            u8::from(self.use_dtx),
            self.max_average_bitrate,
            u8::from(self.stereo),
            self.max_playback_rate
        )
    }
}

/// Munging preferences for locally created offers and answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationOptions {
    pub preferred_audio_codec: Option<String>,
    pub preferred_video_codec: Option<String>,
    pub opus: Option<OpusSettings>,
    pub audio_bandwidth_kbps: Option<u32>,
    pub video_bandwidth_kbps: Option<u32>,
}

impl Default for NegotiationOptions {
    fn default() -> Self {
        Self {
            preferred_audio_codec: Some("opus".to_string()),
            preferred_video_codec: None,
            opus: Some(OpusSettings::default()),
            audio_bandwidth_kbps: None,
            video_bandwidth_kbps: None,
        }
    }
}

impl NegotiationOptions {
    /// No munging at all
    pub fn passthrough() -> Self {
        Self {
            preferred_audio_codec: None,
            preferred_video_codec: None,
            opus: None,
            audio_bandwidth_kbps: None,
            video_bandwidth_kbps: None,
        }
    }

    pub fn apply(&self, sdp: &str) -> String {
        let mut sdp = sdp.to_string();
        if let Some(codec) = &self.preferred_audio_codec {
            sdp = prefer_codec(&sdp, MediaKind::Audio, codec);
        }
        if let Some(codec) = &self.preferred_video_codec {
            sdp = prefer_codec(&sdp, MediaKind::Video, codec);
        }
        if let Some(opus) = &self.opus {
            sdp = apply_opus_settings(&sdp, opus);
        }
        if let Some(kbps) = self.audio_bandwidth_kbps {
            sdp = apply_bandwidth_limit(&sdp, MediaKind::Audio, kbps);
        }
        if let Some(kbps) = self.video_bandwidth_kbps {
            sdp = apply_bandwidth_limit(&sdp, MediaKind::Video, kbps);
        }
        sdp
    }
}

struct SdpLines<'a> {
    lines: Vec<&'a str>,
    trailing_newline: bool,
}

impl<'a> SdpLines<'a> {
    fn parse(sdp: &'a str) -> Self {
        Self {
            lines: sdp.lines().collect(),
            trailing_newline: sdp.ends_with('\n'),
        }
    }

    fn join(lines: &[String], trailing_newline: bool) -> String {
        let mut out = lines.join("\r\n");
        if trailing_newline {
            out.push_str("\r\n");
        }
        out
    }

    /// Index range of each section for `media`, m-line included
    fn sections(&self, media: MediaKind) -> Vec<(usize, usize)> {
        let prefix = format!("m={} ", media.as_str());
        let starts: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.starts_with("m="))
            .map(|(i, _)| i)
            .collect();

        starts
            .iter()
            .enumerate()
            .filter(|(_, start)| self.lines[**start].starts_with(&prefix))
            .map(|(n, start)| (*start, starts.get(n + 1).copied().unwrap_or(self.lines.len())))
            .collect()
    }
}

/// Payload type of `a=rtpmap:<pt> <codec>/...` within a line range
fn rtpmap_payload(lines: &[&str], codec: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        let rest = line.strip_prefix("a=rtpmap:")?;
        let (payload, encoding) = rest.split_once(' ')?;
        let name = encoding.split('/').next()?;
        name.eq_ignore_ascii_case(codec).then(|| payload.to_string())
    })
}

/// Move `codec` to the front of the payload list of the first `media` section
pub fn prefer_codec(sdp: &str, media: MediaKind, codec: &str) -> String {
    let parsed = SdpLines::parse(sdp);
    let Some(&(start, end)) = parsed.sections(media).first() else {
        return sdp.to_string();
    };
    let Some(payload) = rtpmap_payload(&parsed.lines[start..end], codec) else {
        return sdp.to_string();
    };

    let elements: Vec<&str> = parsed.lines[start].split(' ').collect();
    if elements.len() < 4 {
        return sdp.to_string();
    }
    let mut reordered: Vec<&str> = elements[..3].to_vec();
    reordered.push(&payload);
    reordered.extend(elements[3..].iter().filter(|p| **p != payload));

    let mut lines: Vec<String> = parsed.lines.iter().map(|l| l.to_string()).collect();
    lines[start] = reordered.join(" ");
    SdpLines::join(&lines, parsed.trailing_newline)
}

/// Replace or insert the opus `a=fmtp` line
pub fn apply_opus_settings(sdp: &str, settings: &OpusSettings) -> String {
    let parsed = SdpLines::parse(sdp);
    let Some(payload) = rtpmap_payload(&parsed.lines, "opus") else {
        return sdp.to_string();
    };
    let fmtp = settings.fmtp(&payload);
    let fmtp_prefix = format!("a=fmtp:{} ", payload);
    let rtpmap_prefix = format!("a=rtpmap:{} ", payload);

    let mut lines: Vec<String> = parsed.lines.iter().map(|l| l.to_string()).collect();
    if let Some(i) = lines.iter().position(|l| l.starts_with(&fmtp_prefix)) {
        lines[i] = fmtp;
    } else if let Some(i) = lines.iter().position(|l| l.starts_with(&rtpmap_prefix)) {
        lines.insert(i + 1, fmtp);
    }
    SdpLines::join(&lines, parsed.trailing_newline)
}

/// Cap every `media` section at `kbps` with a `b=AS:` line
pub fn apply_bandwidth_limit(sdp: &str, media: MediaKind, kbps: u32) -> String {
    let parsed = SdpLines::parse(sdp);
    let sections = parsed.sections(media);
    if sections.is_empty() {
        return sdp.to_string();
    }

    let mut lines: Vec<String> = Vec::with_capacity(parsed.lines.len() + sections.len());
    for (i, line) in parsed.lines.iter().enumerate() {
        let in_section = sections.iter().any(|(start, end)| i > *start && i < *end);
        if in_section && line.starts_with("b=AS:") {
            continue;
        }
        lines.push(line.to_string());

        // b= goes after the m-line and any i=/c= lines that follow it
        let Some(&(_, end)) = sections.iter().find(|(start, end)| i >= *start && i < *end) else {
            continue;
        };
        let next = parsed.lines.get(i + 1).filter(|_| i + 1 < end);
        let header_continues = next.is_some_and(|l| l.starts_with("i=") || l.starts_with("c="));
        let is_header = line.starts_with("m=") || line.starts_with("i=") || line.starts_with("c=");
        if is_header && !header_continues {
            lines.push(format!("b=AS:{}", kbps));
        }
    }
    SdpLines::join(&lines, parsed.trailing_newline)
}
