/// Sort orderings for a directory's children.
///
/// The loader always pre-sorts each batch with [`loader_order`]; the tree
/// consumer re-sorts with the user's [`SortMode`] independently.
use super::entry::{extension_of, DirEntry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::SystemTime;

/// Anything that can be ordered by the four sort modes.
pub trait SortFields {
    fn sort_name(&self) -> &str;
    fn sort_is_dir(&self) -> bool;
    /// Size used by [`SortMode::Size`]. Directories without an aggregated
    /// size report 0.
    fn sort_size(&self) -> u64;
    fn sort_created(&self) -> Option<SystemTime>;
}

impl SortFields for DirEntry {
    fn sort_name(&self) -> &str {
        &self.name
    }
    fn sort_is_dir(&self) -> bool {
        self.is_dir
    }
    fn sort_size(&self) -> u64 {
        self.size
    }
    fn sort_created(&self) -> Option<SystemTime> {
        self.created
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Name,
    Size,
    Date,
    Type,
}

impl SortMode {
    pub const ALL: [SortMode; 4] = [Self::Name, Self::Size, Self::Date, Self::Type];

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Size => "size",
            Self::Date => "date",
            Self::Type => "type",
        }
    }

    pub fn compare<T: SortFields + ?Sized>(self, a: &T, b: &T) -> Ordering {
        match self {
            Self::Name => cmp_name(a.sort_name(), b.sort_name()),
            Self::Size => b
                .sort_size()
                .cmp(&a.sort_size())
                .then_with(|| cmp_name(a.sort_name(), b.sort_name())),
            Self::Date => cmp_created(a, b),
            Self::Type => b
                .sort_is_dir()
                .cmp(&a.sort_is_dir())
                .then_with(|| type_key(a).cmp(&type_key(b)))
                .then_with(|| cmp_name(a.sort_name(), b.sort_name())),
        }
    }
}

/// Batch order used by the directory loader: directories first, then name.
pub fn loader_order<T: SortFields + ?Sized>(a: &T, b: &T) -> Ordering {
    b.sort_is_dir()
        .cmp(&a.sort_is_dir())
        .then_with(|| cmp_name(a.sort_name(), b.sort_name()))
}

/// Case-insensitive name comparison. Names equal up to case fall back to a
/// byte comparison so the order stays total.
pub fn cmp_name(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}

// Timestamped entries ascend by time; entries without a timestamp go after
// them, ordered by name. `sort_by` needs a total order, which a pairwise
// "fall back to name whenever either side is missing" rule is not.
fn cmp_created<T: SortFields + ?Sized>(a: &T, b: &T) -> Ordering {
    match (a.sort_created(), b.sort_created()) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| cmp_name(a.sort_name(), b.sort_name()))
}

fn type_key<T: SortFields + ?Sized>(entry: &T) -> String {
    if entry.sort_is_dir() {
        String::new()
    } else {
        extension_of(entry.sort_name())
    }
}
