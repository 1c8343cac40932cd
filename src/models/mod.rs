pub mod account;
pub mod catalog;
pub mod dates;
pub mod job;
pub mod musicbrainz;
pub mod scrobble;
pub mod spotify;
pub mod user;

pub use account::Account;
pub use catalog::{
    Album, Artist, ArtistCredit, ArtistGroupMembership, ArtistType, Track, TrackUpsert,
};
pub use job::{EnqueueResult, EnrichmentJob, EntityKind, JobKind, JobStatus, KindCount, QueueStats};
pub use scrobble::{PlaybackSession, Scrobble, ScrobbleCursor};
pub use spotify::{PlayHistoryItem, PollResult, SpotifyTrack, TrackSnapshot};
pub use user::{AuthenticatedUser, Claims, User};
