pub mod catalog;
pub mod coverart;
pub mod enrichment;
pub mod ingest;
pub mod job_queue;
pub mod musicbrainz;
pub mod reconciler;
pub mod resolver;
pub mod scheduler;
pub mod session_engine;
pub mod spotify;

pub use catalog::CatalogService;
pub use coverart::CoverArtClient;
pub use enrichment::EnrichmentWorker;
pub use ingest::PlayIngestor;
pub use job_queue::JobQueueService;
pub use musicbrainz::MusicBrainzClient;
pub use reconciler::Reconciler;
pub use resolver::{MetadataCache, MetadataResolver};
pub use session_engine::SessionEngine;
pub use spotify::{SpotifyClient, PROVIDER_SPOTIFY};
