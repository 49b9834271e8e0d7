pub mod fetcher;

pub use fetcher::{file_name_from_url, ArchiveFetcher, DEFAULT_MAX_REDIRECTS};
