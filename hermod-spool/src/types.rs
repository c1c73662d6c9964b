/// Identifier of a spooled message.
///
/// A ULID, which doubles as the record's filename stem. ULIDs sort by creation time, so listing
/// order roughly follows arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpooledMessageId {
    id: ulid::Ulid,
}

/// Extension of persisted records.
pub const RECORD_EXTENSION: &str = "ron";

impl SpooledMessageId {
    /// Parses an identifier from a record filename such as `01ARZ3NDEKTSV4RRFFQ69G5FAV.ron`.
    ///
    /// Anything containing path separators or traversal patterns is rejected outright.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        filename
            .strip_suffix(RECORD_EXTENSION)
            .and_then(|stem| stem.strip_suffix('.'))
            .and_then(Self::parse)
    }

    /// Parses the bare identifier, as stored in [`Envelope::location`](hermod_common::Envelope::location).
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        ulid::Ulid::from_string(id).ok().map(Self::new)
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.{RECORD_EXTENSION}", self.id)
    }
}

impl std::fmt::Display for SpooledMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
