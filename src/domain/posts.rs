//! Post types and the bounded transformations derived from them.

use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

/// Display pattern for publication dates: `15 Mar 2021`.
pub const HUMAN_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day] [month repr:short] [year]");

/// Display pattern for the edited annotation: `16 Mar 2021, 9:25`.
pub const EDITED_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day] [month repr:short] [year], [hour padding:none]:[minute]");

/// Fixed reading speed used for the estimated reading time.
pub const WORDS_PER_MINUTE: u64 = 200;

/// A post as it appears in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub slug: String,
    pub first_published_at: Option<OffsetDateTime>,
    pub title: String,
    pub subtitle: String,
    pub author: String,
}

/// A fully-resolved post for the detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    pub slug: String,
    pub first_published_at: Option<OffsetDateTime>,
    pub last_published_at: Option<OffsetDateTime>,
    pub title: String,
    pub subtitle: String,
    pub banner_url: String,
    pub author: String,
    pub sections: Vec<ContentSection>,
}

/// A titled block of paragraphs. Author-defined order is preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSection {
    pub heading: String,
    pub paragraphs: Vec<String>,
}

impl PostDetail {
    /// A post counts as edited when its publication instants differ.
    pub fn was_edited(&self) -> bool {
        self.first_published_at != self.last_published_at
    }

    pub fn reading_time(&self) -> u64 {
        reading_time(&self.sections)
    }
}

/// Estimated minutes to read: total word count over all sections at a fixed
/// speed, rounded up. Empty content reads in zero minutes.
pub fn reading_time(sections: &[ContentSection]) -> u64 {
    let words: u64 = sections
        .iter()
        .flat_map(|section| section.paragraphs.iter())
        .map(|paragraph| word_count(paragraph) as u64)
        .sum();

    words.div_ceil(WORDS_PER_MINUTE)
}

/// Count word tokens: runs of word characters (alphanumeric or `_`) separated
/// by anything else.
pub fn word_count(text: &str) -> usize {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .count()
}

pub fn format_human_date(instant: OffsetDateTime) -> String {
    instant.format(HUMAN_DATE_FORMAT).expect("valid calendar date")
}

pub fn format_edited_date(instant: OffsetDateTime) -> String {
    instant.format(EDITED_DATE_FORMAT).expect("valid calendar date")
}
