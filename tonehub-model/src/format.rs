use std::fmt;

/// Coarse media classification used for filtering catalogs.
///
/// Discriminants follow the iTunes media-kind (`stik`) enumeration so values
/// read from container metadata map directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(i32)]
pub enum FormatCategory {
    #[default]
    Unspecified = -1,
    Music = 1,
    Audiobook = 2,
    MusicVideo = 6,
    Movie = 9,
    TvShow = 10,
    Booklet = 11,
    Ringtone = 14,
    Podcast = 21,
    ITunesU = 23,
}

impl FormatCategory {
    /// Map a raw media-kind value; anything outside the known range is
    /// `Unspecified`.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => FormatCategory::Music,
            2 => FormatCategory::Audiobook,
            6 => FormatCategory::MusicVideo,
            9 => FormatCategory::Movie,
            10 => FormatCategory::TvShow,
            11 => FormatCategory::Booklet,
            14 => FormatCategory::Ringtone,
            21 => FormatCategory::Podcast,
            23 => FormatCategory::ITunesU,
            _ => FormatCategory::Unspecified,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn is_specified(self) -> bool {
        self != FormatCategory::Unspecified
    }

    /// Whether a file of category `self` may be cataloged under a source
    /// filtered to `filter`.
    pub fn passes_filter(self, filter: FormatCategory) -> bool {
        !filter.is_specified() || !self.is_specified() || self == filter
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatCategory::Unspecified => "unspecified",
            FormatCategory::Music => "music",
            FormatCategory::Audiobook => "audiobook",
            FormatCategory::MusicVideo => "music_video",
            FormatCategory::Movie => "movie",
            FormatCategory::TvShow => "tv_show",
            FormatCategory::Booklet => "booklet",
            FormatCategory::Ringtone => "ringtone",
            FormatCategory::Podcast => "podcast",
            FormatCategory::ITunesU => "itunes_u",
        }
    }
}

impl fmt::Display for FormatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
