//! Operating modes and the trigger word's semantic role.
//!
//! A run's mode is decided exactly once, by [`select_mode`], from the two
//! folder arguments and the optional role.

use std::ffi::OsStr;
use std::fmt;

use clap::ValueEnum;

/// What the trigger word stands for in the refined caption
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// A character or subject ("man", "boy", "figure")
    Subject,

    /// An artistic style
    Style,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Subject => write!(f, "subject"),
            Role::Style => write!(f, "style"),
        }
    }
}

/// How the batch processor treats each image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Input and output folders are the same: refine existing captions in place
    RefineOnly { role: Role },

    /// Caption each image remotely, then refine the caption
    CaptionAndRefine { role: Role },

    /// Caption each image, prefix the trigger word, copy the image alongside
    CaptionOnly,
}

impl Mode {
    /// Whether this mode calls the captioning backend
    pub fn needs_captioner(&self) -> bool {
        !matches!(self, Mode::RefineOnly { .. })
    }

    /// Whether this mode calls the refinement backend
    pub fn needs_refiner(&self) -> bool {
        !matches!(self, Mode::CaptionOnly)
    }

    /// Whether attempted files are followed by the pacing delay
    pub fn is_paced(&self) -> bool {
        self.needs_refiner()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::RefineOnly { role } => write!(f, "refine-only ({})", role),
            Mode::CaptionAndRefine { role } => write!(f, "caption-and-refine ({})", role),
            Mode::CaptionOnly => write!(f, "caption-only"),
        }
    }
}

/// Pick the operating mode for a run.
///
/// Without a role the legacy single-stage mode is used. With a role, the
/// folders are compared as raw argument strings: identical means the
/// captions already live next to the images and only need refining.
pub fn select_mode(input: &OsStr, output: &OsStr, role: Option<Role>) -> Mode {
    match role {
        None => Mode::CaptionOnly,
        Some(role) if input == output => Mode::RefineOnly { role },
        Some(role) => Mode::CaptionAndRefine { role },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_folder_selects_refine_only() {
        let mode = select_mode(
            OsStr::new("dataset"),
            OsStr::new("dataset"),
            Some(Role::Subject),
        );
        assert_eq!(mode, Mode::RefineOnly { role: Role::Subject });
    }

    #[test]
    fn test_distinct_folders_select_caption_and_refine() {
        let mode = select_mode(OsStr::new("in"), OsStr::new("out"), Some(Role::Style));
        assert_eq!(mode, Mode::CaptionAndRefine { role: Role::Style });
    }

    #[test]
    fn test_equality_is_textual() {
        // Same directory spelled differently is not "the same folder"
        let mode = select_mode(
            OsStr::new("dataset"),
            OsStr::new("dataset/"),
            Some(Role::Subject),
        );
        assert_eq!(mode, Mode::CaptionAndRefine { role: Role::Subject });
    }

    #[test]
    fn test_no_role_selects_caption_only() {
        assert_eq!(
            select_mode(OsStr::new("a"), OsStr::new("a"), None),
            Mode::CaptionOnly
        );
        assert!(!Mode::CaptionOnly.is_paced());
        assert!(!Mode::CaptionOnly.needs_refiner());
        assert!(!Mode::RefineOnly { role: Role::Style }.needs_captioner());
    }
}
