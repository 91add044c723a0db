use std::fmt::Display;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version)]
/// Extract video metadata and stream urls from PMVHaven videos and profiles
pub(crate) struct Args {
    /// Print one JSON document instead of one JSON line per video
    #[arg(short = 'J', long)]
    pub(crate) dump_single_json: bool,

    /// List the videos of a profile without resolving them
    #[arg(long)]
    pub(crate) flat_playlist: bool,

    /// Stop after this many playlist entries
    #[arg(short = 'I', long, value_parser = parse_optional_with_inf_as_none::<NonZeroUsize>, default_value = "inf", hide_default_value = true, value_name = "INF|NUMBER")]
    pub(crate) playlist_end: OptionWrapper<NonZeroUsize>,

    /// Read the video page from a file instead of downloading it
    #[arg(long, value_name = "FILE", conflicts_with_all = ["flat_playlist", "playlist_end"])]
    pub(crate) source: Option<PathBuf>,

    /// User agent sent with every request
    #[arg(long, value_name = "USER_AGENT")]
    pub(crate) user_agent: Option<String>,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "debug")]
    pub(crate) quiet: bool,

    /// Enable debug mode
    #[arg(short, long)]
    pub(crate) debug: bool,

    /// Video or profile URL
    pub(crate) url: String,
}

#[derive(Debug, Clone)]
pub(crate) struct OptionWrapper<T>(Option<T>);

impl<T> OptionWrapper<T> {
    pub(crate) fn inner(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

fn parse_optional_with_none<T: FromStr>(input: &str, none_value: &'static str) -> Result<OptionWrapper<T>, String>
where
    T::Err: Display,
{
    if input.eq_ignore_ascii_case(none_value) {
        Ok(OptionWrapper(None))
    } else {
        input
            .parse::<T>()
            .map(|value| OptionWrapper(Some(value)))
            .map_err(|err| format!("{err}"))
    }
}

fn parse_optional_with_inf_as_none<T: FromStr>(input: &str) -> Result<OptionWrapper<T>, String>
where
    T::Err: Display,
{
    parse_optional_with_none(input, "inf")
}
