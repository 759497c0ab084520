// Jukebox API Library
//
// HTTP surface for the jukebox: real-time channel, stream files, probes

pub mod http;

pub use http::{create_router, AppState};
