use lofty::tag::ItemKey;

/// Type codes emitted by the audio extractor.
///
/// Codes are persisted with every association; never renumber a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AudioProperty {
    Title = 1,
    Subtitle = 2,
    Album = 3,
    Artist = 4,
    AlbumArtist = 5,
    Composer = 6,
    Conductor = 7,
    Producer = 8,
    Publisher = 9,
    Genre = 10,
    Comment = 11,
    Description = 12,
    TrackNumber = 13,
    TrackTotal = 14,
    DiscNumber = 15,
    DiscTotal = 16,
    RecordingDate = 17,
    Encoder = 18,
    Language = 19,
    DurationMs = 20,

    LongDescription = 40,
    Lyrics = 41,
    Chapters = 42,
    AdditionalFields = 43,
}

impl AudioProperty {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Properties carried only as structured values, never as scalar tags.
    pub const fn is_structured_only(self) -> bool {
        matches!(
            self,
            AudioProperty::LongDescription
                | AudioProperty::Lyrics
                | AudioProperty::Chapters
                | AudioProperty::AdditionalFields
        )
    }

    pub const fn is_date(self) -> bool {
        matches!(self, AudioProperty::RecordingDate)
    }

    /// Map a tag item key onto a known property; unmapped keys end up in
    /// [`AudioProperty::AdditionalFields`].
    pub fn for_item_key(key: &ItemKey) -> Option<Self> {
        let property = match key {
            ItemKey::TrackTitle => AudioProperty::Title,
            ItemKey::TrackSubtitle => AudioProperty::Subtitle,
            ItemKey::AlbumTitle => AudioProperty::Album,
            ItemKey::TrackArtist => AudioProperty::Artist,
            ItemKey::AlbumArtist => AudioProperty::AlbumArtist,
            ItemKey::Composer => AudioProperty::Composer,
            ItemKey::Conductor => AudioProperty::Conductor,
            ItemKey::Producer => AudioProperty::Producer,
            ItemKey::Publisher => AudioProperty::Publisher,
            ItemKey::Genre => AudioProperty::Genre,
            ItemKey::Comment => AudioProperty::Comment,
            ItemKey::Description => AudioProperty::Description,
            ItemKey::TrackNumber => AudioProperty::TrackNumber,
            ItemKey::TrackTotal => AudioProperty::TrackTotal,
            ItemKey::DiscNumber => AudioProperty::DiscNumber,
            ItemKey::DiscTotal => AudioProperty::DiscTotal,
            ItemKey::RecordingDate => AudioProperty::RecordingDate,
            ItemKey::EncoderSoftware => AudioProperty::Encoder,
            ItemKey::Language => AudioProperty::Language,
            ItemKey::Lyrics => AudioProperty::Lyrics,
            _ => return None,
        };
        Some(property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_stay_below_the_custom_range() {
        let all = [
            AudioProperty::Title,
            AudioProperty::DurationMs,
            AudioProperty::AdditionalFields,
        ];
        for property in all {
            assert!(tonehub_model::is_managed_type(property.code()));
        }
    }

    #[test]
    fn lyrics_are_structured_only() {
        let lyrics = AudioProperty::for_item_key(&ItemKey::Lyrics);
        assert_eq!(lyrics, Some(AudioProperty::Lyrics));
        assert!(AudioProperty::Lyrics.is_structured_only());
        assert!(!AudioProperty::Artist.is_structured_only());
        assert_eq!(
            AudioProperty::for_item_key(&ItemKey::Unknown("MOOD".into())),
            None
        );
    }
}
