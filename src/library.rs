//! Library naming templates.
//!
//! Completed downloads are filed into the library under category-driven
//! paths built from the job title and its metadata hints:
//!
//! - Movies: `<library>/Movies/<Title> (<Year>)/<Title> (<Year>).<ext>`
//! - TV: `<library>/TV/<Series>/Season <NN>/<Series> - S<NN>E<MM>[ - <Episode>].<ext>`
//!
//! A language hint is appended to the filename stem when it is not already
//! part of the title. Every path component passes through the sanitizer so
//! provider-supplied titles cannot escape the library root.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::types::Category;
use crate::utils::sanitize_component;

#[allow(clippy::expect_used)]
fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<title>.+?)\s*\((?P<year>\d{4})\)\s*$").expect("static regex")
    })
}

#[allow(clippy::expect_used)]
fn episode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?P<series>.*?)[\s._-]*S(?P<season>\d{1,2})[\s._]*E(?P<episode>\d{1,3})")
            .expect("static regex")
    })
}

/// Split a "Title (Year)" display title
pub fn parse_year(title: &str) -> Option<(String, u32)> {
    let caps = year_re().captures(title.trim())?;
    let year = caps.name("year")?.as_str().parse().ok()?;
    Some((caps.name("title")?.as_str().to_string(), year))
}

/// Pull a series name and SxxEyy marker out of a release-style title
pub fn parse_episode(title: &str) -> Option<(String, u32, u32)> {
    let caps = episode_re().captures(title.trim())?;
    let season = caps.name("season")?.as_str().parse().ok()?;
    let episode = caps.name("episode")?.as_str().parse().ok()?;
    let series = caps
        .name("series")?
        .as_str()
        .replace(['.', '_'], " ")
        .trim()
        .to_string();
    if series.is_empty() {
        return None;
    }
    Some((series, season, episode))
}

fn meta_str<'a>(metadata: Option<&'a serde_json::Value>, key: &str) -> Option<&'a str> {
    metadata?.get(key)?.as_str().filter(|s| !s.is_empty())
}

fn meta_u32(metadata: Option<&serde_json::Value>, key: &str) -> Option<u32> {
    let value = metadata?.get(key)?;
    value
        .as_u64()
        .map(|v| v as u32)
        .or_else(|| value.as_str()?.parse().ok())
}

/// Append the language hint to a filename stem unless the title already
/// carries it
fn apply_language(stem: String, title: &str, metadata: Option<&serde_json::Value>) -> String {
    let Some(language) = meta_str(metadata, "language") else {
        return stem;
    };
    let tag = language.to_uppercase();
    if title.to_uppercase().contains(&tag) {
        return stem;
    }
    format!("{stem} [{tag}]")
}

/// Compute the library destination for a completed job.
///
/// `extension` is the produced file's extension without the dot; an empty
/// extension yields a bare filename.
pub fn destination_for(
    library_root: &Path,
    category: Category,
    title: &str,
    metadata: Option<&serde_json::Value>,
    extension: &str,
) -> PathBuf {
    let (dir, stem) = match category {
        Category::Tv => tv_destination(library_root, title, metadata),
        _ => flat_destination(library_root, category, title, metadata),
    };

    // Stems may legitimately contain dots, so the extension is appended
    // rather than substituted.
    let filename = if extension.is_empty() {
        stem
    } else {
        format!("{stem}.{extension}")
    };
    dir.join(filename)
}

/// Movies (and the flat categories): a folder per item, file named like it
fn flat_destination(
    library_root: &Path,
    category: Category,
    title: &str,
    metadata: Option<&serde_json::Value>,
) -> (PathBuf, String) {
    let display = sanitize_component(title);
    let stem = sanitize_component(&apply_language(display.clone(), title, metadata));

    match category {
        Category::Movies => (library_root.join(category.as_str()).join(&display), stem),
        _ => (library_root.join(category.as_str()), stem),
    }
}

/// TV: series / season folder / "<Series> - SxxEyy[ - Episode]"
fn tv_destination(
    library_root: &Path,
    title: &str,
    metadata: Option<&serde_json::Value>,
) -> (PathBuf, String) {
    let hinted_series = meta_str(metadata, "series").map(str::to_string);
    let hinted_season = meta_u32(metadata, "season");
    let hinted_episode = meta_u32(metadata, "episode");

    let parsed = parse_episode(title);

    let series = hinted_series
        .or_else(|| parsed.as_ref().map(|(s, _, _)| s.clone()))
        .unwrap_or_else(|| title.to_string());
    let season = hinted_season
        .or_else(|| parsed.as_ref().map(|(_, s, _)| *s))
        .unwrap_or(1);
    let episode = hinted_episode.or_else(|| parsed.as_ref().map(|(_, _, e)| *e));

    let series = sanitize_component(&series);
    let mut stem = match episode {
        Some(episode) => format!("{series} - S{season:02}E{episode:02}"),
        None => format!("{series} - S{season:02}"),
    };

    if let Some(episode_title) = meta_str(metadata, "episode_title") {
        stem.push_str(" - ");
        stem.push_str(&sanitize_component(episode_title));
    }

    let stem = sanitize_component(&apply_language(stem, title, metadata));

    (
        library_root
            .join(Category::Tv.as_str())
            .join(&series)
            .join(format!("Season {season:02}")),
        stem,
    )
}
