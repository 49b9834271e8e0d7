// ─── Yomiage engine core ───
// Installs and runs the local VOICEVOX speech engine.
//
// Architecture:
//   core/
//     registry       Catalog of engine variants and their download parts
//     downloader/    Streaming archive fetcher with bounded redirects
//     extract/       7-Zip and zip extractors behind one trait
//     layout         Nested-directory repair for extracted engines
//     installations  Per-variant install directories and probes
//     installer/     Download → extract → normalize → receipt workflow
//     supervisor/    Engine process lifecycle and health probe
//     operations     IPC-facing result objects
//     state/         Application state wired from the config

pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod extract;
pub mod fs;
pub mod http;
pub mod installations;
pub mod installer;
pub mod layout;
pub mod operations;
pub mod platform;
pub mod registry;
pub mod state;
pub mod supervisor;
