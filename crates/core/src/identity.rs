use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{MediaFile, MediaType};

static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d{4})\)").expect("static year pattern"));
static YEAR_SUFFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\((\d{4})\)\s*$").expect("static year suffix pattern"));

const STRIPPED_CHARS: &[char] = &[
    ' ', '.', '-', '_', '\'', ':', '&', '*', ',', '!', '?', '(', ')', '[', ']',
];

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaIdentity {
    pub media_type: MediaType,
    pub normalized_title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl MediaIdentity {
    pub fn movie(title: &str, year: Option<i32>) -> Self {
        Self {
            media_type: MediaType::Movie,
            normalized_title: normalize_title(title),
            year,
            season: None,
            episode: None,
        }
    }

    pub fn episode(title: &str, year: Option<i32>, season: u32, episode: u32) -> Self {
        Self {
            media_type: MediaType::Episode,
            normalized_title: normalize_title(title),
            year,
            season: Some(season),
            episode: Some(episode),
        }
    }

    pub fn for_file(file: &MediaFile) -> Self {
        let (season, episode) = match file.media_type {
            MediaType::Episode => (file.season, file.episode),
            _ => (None, None),
        };
        Self {
            media_type: file.media_type,
            normalized_title: file.normalized_title.clone(),
            year: file.year,
            season,
            episode,
        }
    }
}

/// "For All Mankind (2019)" -> "forallmankind", "M*A*S*H" -> "mash".
pub fn normalize_title(title: &str) -> String {
    let without_suffix = YEAR_SUFFIX_PATTERN.replace(title, "");
    without_suffix
        .to_lowercase()
        .chars()
        .filter(|ch| !STRIPPED_CHARS.contains(ch))
        .collect()
}

/// First parenthesized year wins when there are several; a lone year only
/// counts when it trails the title.
pub fn extract_year(title: &str) -> Option<i32> {
    let years = YEAR_PATTERN
        .captures_iter(title)
        .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()))
        .collect::<Vec<_>>();

    match years.as_slice() {
        [] => None,
        [_] => YEAR_SUFFIX_PATTERN
            .captures(title)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .filter(|year| is_plausible_year(*year)),
        many => many.iter().copied().find(|year| is_plausible_year(*year)),
    }
}

/// "Show (2015) (2025)" -> "Show (2025)", "Star Trek (2009) Remastered" is unchanged.
pub fn strip_year(title: &str) -> String {
    let matches = YEAR_PATTERN.captures_iter(title).collect::<Vec<_>>();
    if matches.is_empty() {
        return title.to_string();
    }

    if matches.len() > 1 {
        let first = &matches[0];
        let (Some(whole), Some(digits)) = (first.get(0), first.get(1)) else {
            return title.to_string();
        };
        let plausible = digits
            .as_str()
            .parse::<i32>()
            .is_ok_and(is_plausible_year);
        if !plausible {
            return title.to_string();
        }

        let before = title[..whole.start()].trim_end_matches(' ');
        let after = title[whole.end()..].trim_start_matches(' ');
        if after.is_empty() {
            return before.to_string();
        }
        return format!("{before} {after}");
    }

    if !YEAR_SUFFIX_PATTERN.is_match(title) {
        return title.to_string();
    }
    YEAR_SUFFIX_PATTERN.replace(title, "").into_owned()
}

fn is_plausible_year(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}

#[cfg(test)]
mod tests {
    use super::{extract_year, normalize_title, strip_year, MediaIdentity};

    #[test]
    fn normalization_ignores_case_punctuation_and_year_suffix() {
        assert_eq!(
            normalize_title("The Office (2005)"),
            normalize_title("the office")
        );
        assert_eq!(normalize_title("For All Mankind (2019)"), "forallmankind");
        assert_eq!(normalize_title("M*A*S*H"), "mash");
        assert_eq!(normalize_title("Marvel's Agents of S.H.I.E.L.D."), "marvelsagentsofshield");
    }

    #[test]
    fn normalization_is_idempotent() {
        for title in [
            "The Office (2005)",
            "Show (2015) (2025)",
            "Star Trek (2009) Remastered",
            "  Weird__Title [Extended]!  ",
            "Ünïcode Tïtle: Part 2",
            "",
        ] {
            let once = normalize_title(title);
            assert_eq!(normalize_title(&once), once, "not idempotent for {title:?}");
        }
    }

    #[test]
    fn extract_year_prefers_first_of_many_and_trailing_single() {
        assert_eq!(extract_year("Show (2015) (2025)"), Some(2015));
        assert_eq!(extract_year("Fallout (2024)"), Some(2024));
        assert_eq!(extract_year("Star Trek (2009) Remastered"), None);
        assert_eq!(extract_year("Untitled"), None);
        assert_eq!(extract_year("Old Reel (1850)"), None);
        assert_eq!(extract_year("Odd (0001) (1999)"), Some(1999));
    }

    #[test]
    fn strip_year_follows_the_same_rules() {
        assert_eq!(strip_year("Show (2015) (2025)"), "Show (2025)");
        assert_eq!(strip_year("For All Mankind (2019)"), "For All Mankind");
        assert_eq!(
            strip_year("Star Trek (2009) Remastered"),
            "Star Trek (2009) Remastered"
        );
        assert_eq!(strip_year("No Year"), "No Year");
    }

    #[test]
    fn episode_identities_differ_by_episode_number() {
        let first = MediaIdentity::episode("Silo", Some(2023), 1, 1);
        let second = MediaIdentity::episode("silo (2023)", Some(2023), 1, 2);
        assert_eq!(first.normalized_title, second.normalized_title);
        assert_ne!(first, second);
        assert_eq!(first, MediaIdentity::episode("SILO", Some(2023), 1, 1));
    }
}
