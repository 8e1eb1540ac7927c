/// A single directory entry as produced by the entry scanner.
///
/// Immutable once built. The tree model copies what it needs out of these
/// records when a batch is applied.
use compact_str::CompactString;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File or directory name only.
    pub name: CompactString,

    /// `true` for directories. Symbolic links are never followed, so a link
    /// to a directory is reported as a non-directory.
    pub is_dir: bool,

    /// Logical size in bytes. Always 0 for directories; their sizes come from
    /// the size aggregator, never from the scanner.
    pub size: u64,

    /// Creation timestamp, `None` if the platform or filesystem cannot
    /// provide one or the stat call failed.
    pub created: Option<SystemTime>,

    /// Directories only: whether at least one entry exists inside.
    /// `false` when the directory cannot be opened.
    pub has_children: bool,

    /// Absolute path of the entry.
    pub path: PathBuf,
}

impl DirEntry {
    /// Lowercased extension without the dot. Empty for directories and for
    /// names without an extension (including dot-files such as `.bashrc`).
    pub fn extension(&self) -> String {
        if self.is_dir {
            return String::new();
        }
        extension_of(&self.name)
    }
}

/// Lowercased extension of a bare file name.
pub fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Photo.JPG"), "jpg");
        assert_eq!(extension_of("archive.tar.GZ"), "gz");
    }

    #[test]
    fn dotfiles_and_bare_names_have_no_extension() {
        assert_eq!(extension_of(".bashrc"), "");
        assert_eq!(extension_of("Makefile"), "");
    }
}
