//! Category derivation from content tags.
//!
//! Categories use Newznab numbering so the search layer can expose them
//! directly. Rules are evaluated top to bottom; the first rule whose every
//! tag group is satisfied wins. A tag group is satisfied when the tag set
//! contains any of its alternatives.

use std::collections::HashSet;

use serde::Serialize;

/// A coarse category: numeric code plus a short label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Category {
    pub code: u32,
    pub label: &'static str,
}

impl Category {
    pub const XXX: Category = Category::new(6000, "xxx");
    pub const MOVIE_UHD: Category = Category::new(2045, "movie");
    pub const MOVIE_HD: Category = Category::new(2040, "movie");
    pub const MOVIE: Category = Category::new(2000, "movie");
    pub const TV_UHD: Category = Category::new(5045, "tv");
    pub const TV_HD: Category = Category::new(5040, "tv");
    pub const ANIME: Category = Category::new(5070, "anime");
    pub const TV: Category = Category::new(5000, "tv");
    pub const AUDIOBOOK: Category = Category::new(3030, "audiobook");
    pub const AUDIO_LOSSLESS: Category = Category::new(3040, "music");
    pub const AUDIO: Category = Category::new(3000, "music");
    pub const GAME: Category = Category::new(4050, "game");
    pub const SOFTWARE: Category = Category::new(4000, "software");
    pub const COMIC: Category = Category::new(7030, "comic");
    pub const BOOK: Category = Category::new(7000, "book");
    pub const OTHER: Category = Category::new(8000, "other");

    const fn new(code: u32, label: &'static str) -> Self {
        Self { code, label }
    }

    /// Look up a category by its code.
    pub fn from_code(code: u32) -> Option<Category> {
        CATEGORY_RULES
            .iter()
            .map(|rule| rule.category)
            .chain(std::iter::once(Category::OTHER))
            .find(|c| c.code == code)
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::OTHER
    }
}

/// One row of the rule table.
#[derive(Debug)]
pub struct CategoryRule {
    /// Every group must match; a group matches if any alternative is present.
    pub required: &'static [&'static [&'static str]],
    pub category: Category,
}

const MOVIE: &[&str] = &["movie", "movies", "film"];
const TV: &[&str] = &["tv", "series", "show", "episode"];
const UHD: &[&str] = &["4k", "uhd", "2160p"];
const HD: &[&str] = &["1080p", "720p", "hd"];
const MUSIC: &[&str] = &["music", "audio", "album"];

/// Ordered rule table. XXX is first so it wins over any other combination.
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule { required: &[&["xxx", "adult", "porn"]], category: Category::XXX },
    CategoryRule { required: &[MOVIE, UHD], category: Category::MOVIE_UHD },
    CategoryRule { required: &[MOVIE, HD], category: Category::MOVIE_HD },
    CategoryRule { required: &[MOVIE], category: Category::MOVIE },
    CategoryRule { required: &[TV, UHD], category: Category::TV_UHD },
    CategoryRule { required: &[TV, HD], category: Category::TV_HD },
    CategoryRule { required: &[&["anime"]], category: Category::ANIME },
    CategoryRule { required: &[TV], category: Category::TV },
    CategoryRule { required: &[&["audiobook"]], category: Category::AUDIOBOOK },
    CategoryRule { required: &[MUSIC, &["flac", "lossless"]], category: Category::AUDIO_LOSSLESS },
    CategoryRule { required: &[MUSIC], category: Category::AUDIO },
    CategoryRule { required: &[&["game", "games"]], category: Category::GAME },
    CategoryRule { required: &[&["software", "app", "application"]], category: Category::SOFTWARE },
    CategoryRule { required: &[&["comic", "comics", "manga"]], category: Category::COMIC },
    CategoryRule { required: &[&["book", "books", "ebook"]], category: Category::BOOK },
];

/// Derive a category from a set of lowercase tags.
///
/// Falls back to [`Category::OTHER`] when no rule matches.
pub fn derive_category<S: AsRef<str>>(tags: &[S]) -> Category {
    let tags: HashSet<String> = tags.iter().map(|t| t.as_ref().to_lowercase()).collect();

    CATEGORY_RULES
        .iter()
        .find(|rule| {
            rule.required
                .iter()
                .all(|group| group.iter().any(|alt| tags.contains(*alt)))
        })
        .map(|rule| rule.category)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_hierarchy() {
        assert_eq!(derive_category(&["movie", "4k"]), Category::MOVIE_UHD);
        assert_eq!(derive_category(&["movie", "1080p"]), Category::MOVIE_HD);
        assert_eq!(derive_category(&["movie"]), Category::MOVIE);
    }

    #[test]
    fn test_xxx_always_wins() {
        assert_eq!(derive_category(&["movie", "4k", "xxx"]), Category::XXX);
        assert_eq!(derive_category(&["tv", "xxx", "flac", "music"]), Category::XXX);
        assert_eq!(derive_category(&["xxx"]), Category::XXX);
    }

    #[test]
    fn test_tags_are_case_insensitive() {
        assert_eq!(derive_category(&["TV", "UHD"]), Category::TV_UHD);
    }

    #[test]
    fn test_music_and_fallback() {
        assert_eq!(derive_category(&["music", "flac"]), Category::AUDIO_LOSSLESS);
        assert_eq!(derive_category(&["album"]), Category::AUDIO);
        assert_eq!(derive_category(&["linux", "iso"]), Category::OTHER);
        assert_eq!(derive_category::<&str>(&[]), Category::OTHER);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Category::from_code(2045), Some(Category::MOVIE_UHD));
        assert_eq!(Category::from_code(8000), Some(Category::OTHER));
        assert_eq!(Category::from_code(1), None);
    }
}
