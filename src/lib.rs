#![allow(async_fn_in_trait)]

pub mod download;
pub mod extractors;
pub mod playlists;
