use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

const EMPTY_FILE_PENALTY: i64 = -1000;
const UNKNOWN_RESOLUTION_PER_GIB: i64 = 20;
const MOVIE_SIZE_BONUS_CAP_GIB: u64 = 50;
const EPISODE_SIZE_BONUS_CAP_GIB: u64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    #[serde(rename = "4320p")]
    R4320p,
    #[serde(rename = "2160p")]
    R2160p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "576p")]
    R576p,
    #[serde(rename = "480p")]
    R480p,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl Resolution {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "4320p" | "8k" => Self::R4320p,
            "2160p" | "4k" | "uhd" => Self::R2160p,
            "1080p" | "1080i" => Self::R1080p,
            "720p" => Self::R720p,
            "576p" => Self::R576p,
            "480p" | "sd" => Self::R480p,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::R4320p => "4320p",
            Self::R2160p => "2160p",
            Self::R1080p => "1080p",
            Self::R720p => "720p",
            Self::R576p => "576p",
            Self::R480p => "480p",
            Self::Unknown => "unknown",
        }
    }

    fn base_score(self) -> Option<i64> {
        match self {
            Self::R4320p => Some(450),
            Self::R2160p => Some(400),
            Self::R1080p => Some(300),
            Self::R720p => Some(200),
            Self::R576p | Self::R480p => Some(100),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SourceType {
    #[serde(rename = "REMUX")]
    Remux,
    #[serde(rename = "BluRay")]
    BluRay,
    #[serde(rename = "WEB-DL")]
    WebDl,
    #[serde(rename = "WEBRip")]
    WebRip,
    #[serde(rename = "HDTV")]
    Hdtv,
    #[serde(rename = "DVDRip")]
    DvdRip,
    #[serde(rename = "CAM")]
    Cam,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl SourceType {
    pub fn parse(value: &str) -> Self {
        let lowered = value.trim().to_ascii_lowercase().replace(['.', '_', ' '], "-");
        match lowered.as_str() {
            "remux" | "bdremux" => Self::Remux,
            "bluray" | "blu-ray" | "bdrip" | "brrip" => Self::BluRay,
            "web-dl" | "webdl" | "web" => Self::WebDl,
            "webrip" | "web-rip" => Self::WebRip,
            "hdtv" => Self::Hdtv,
            "dvdrip" | "dvd" => Self::DvdRip,
            "cam" | "ts" | "tc" | "dvdscr" | "telesync" => Self::Cam,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Remux => "REMUX",
            Self::BluRay => "BluRay",
            Self::WebDl => "WEB-DL",
            Self::WebRip => "WEBRip",
            Self::Hdtv => "HDTV",
            Self::DvdRip => "DVDRip",
            Self::Cam => "CAM",
            Self::Unknown => "unknown",
        }
    }

    fn score(self) -> i64 {
        match self {
            Self::Remux => 100,
            Self::BluRay => 80,
            Self::WebDl => 60,
            Self::WebRip => 50,
            Self::Hdtv => 40,
            Self::DvdRip => 20,
            Self::Cam | Self::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum VideoCodec {
    #[serde(rename = "AV1")]
    Av1,
    #[serde(rename = "x265")]
    Hevc,
    #[serde(rename = "x264")]
    Avc,
    #[serde(rename = "VP9")]
    Vp9,
    #[serde(rename = "XviD")]
    Xvid,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl VideoCodec {
    pub fn parse(value: &str) -> Self {
        let upper = value.to_ascii_uppercase();
        if upper.contains("AV1") {
            Self::Av1
        } else if ["HEVC", "H.265", "H265", "X265"]
            .iter()
            .any(|marker| upper.contains(marker))
        {
            Self::Hevc
        } else if ["H.264", "H264", "X264", "AVC"]
            .iter()
            .any(|marker| upper.contains(marker))
        {
            Self::Avc
        } else if upper.contains("VP9") {
            Self::Vp9
        } else if upper.contains("XVID") {
            Self::Xvid
        } else {
            Self::Unknown
        }
    }

    fn bonus(self) -> i64 {
        match self {
            Self::Av1 => 3,
            Self::Hevc => 2,
            Self::Avc | Self::Vp9 => 1,
            Self::Xvid | Self::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AudioFormat {
    #[serde(rename = "Atmos")]
    Atmos,
    #[serde(rename = "TrueHD")]
    TrueHd,
    #[serde(rename = "DTS:X")]
    DtsX,
    #[serde(rename = "DTS-HD MA")]
    DtsHdMa,
    #[serde(rename = "DTS-HD")]
    DtsHd,
    #[serde(rename = "DTS")]
    Dts,
    #[serde(rename = "DD+")]
    Eac3,
    #[serde(rename = "DD")]
    Ac3,
    #[serde(rename = "AAC")]
    Aac,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl AudioFormat {
    pub fn parse(value: &str) -> Self {
        let upper = value.to_ascii_uppercase();
        if upper.contains("ATMOS") {
            Self::Atmos
        } else if upper.contains("TRUEHD") {
            Self::TrueHd
        } else if upper.contains("DTS:X") || upper.contains("DTS-X") {
            Self::DtsX
        } else if upper.contains("DTS-HD MA") || upper.contains("DTS-HD.MA") {
            Self::DtsHdMa
        } else if upper.contains("DTS-HD") {
            Self::DtsHd
        } else if upper.contains("DTS") {
            Self::Dts
        } else if upper.contains("DD+") || upper.contains("EAC3") || upper.contains("DDP") {
            Self::Eac3
        } else if upper.contains("AC3") || upper == "DD" || upper.contains("DD5") {
            Self::Ac3
        } else if upper.contains("AAC") {
            Self::Aac
        } else {
            Self::Unknown
        }
    }

    fn bonus(self) -> i64 {
        match self {
            Self::Atmos => 5,
            Self::TrueHd | Self::DtsX | Self::DtsHdMa => 4,
            Self::DtsHd | Self::Dts => 3,
            Self::Eac3 => 2,
            Self::Ac3 | Self::Aac => 1,
            Self::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct QualityProfile {
    pub resolution: Resolution,
    pub source: SourceType,
    pub codec: VideoCodec,
    pub audio: AudioFormat,
}

/// Total over every input: an empty file always ranks last, unknown resolution
/// is weighted by size instead.
pub fn quality_score(profile: &QualityProfile, size_bytes: u64, is_episode: bool) -> i64 {
    if size_bytes == 0 {
        return EMPTY_FILE_PENALTY;
    }

    let size_gib = size_bytes / GIB;
    let resolution = profile
        .resolution
        .base_score()
        .unwrap_or(size_gib as i64 * UNKNOWN_RESOLUTION_PER_GIB);

    let cap = if is_episode {
        EPISODE_SIZE_BONUS_CAP_GIB
    } else {
        MOVIE_SIZE_BONUS_CAP_GIB
    };
    let size_bonus = size_gib.min(cap) as i64;

    resolution + profile.source.score() + size_bonus + profile.codec.bonus() + profile.audio.bonus()
}
